//! `bindery-operator crdgen` (§A.6), grounded in the kube-rs
//! `cargo run --bin crdgen | kubectl apply -f -` convention used throughout
//! the retrieval pack's operator examples.

use kube::CustomResourceExt;

use bindery_types::{
    Booklet, CapabilityBinding, ModuleManifest, Realm, ShardAutoscaler, WorldInstance, WorldShard,
    WorldStorageClaim,
};

/// Prints every CRD this operator owns as a multi-document YAML stream.
pub fn print_all() {
    let crds: Vec<serde_yaml::Value> = vec![
        serde_yaml::to_value(ModuleManifest::crd()).expect("ModuleManifest CRD serializes"),
        serde_yaml::to_value(Booklet::crd()).expect("Booklet CRD serializes"),
        serde_yaml::to_value(WorldInstance::crd()).expect("WorldInstance CRD serializes"),
        serde_yaml::to_value(WorldShard::crd()).expect("WorldShard CRD serializes"),
        serde_yaml::to_value(CapabilityBinding::crd()).expect("CapabilityBinding CRD serializes"),
        serde_yaml::to_value(Realm::crd()).expect("Realm CRD serializes"),
        serde_yaml::to_value(WorldStorageClaim::crd()).expect("WorldStorageClaim CRD serializes"),
        serde_yaml::to_value(ShardAutoscaler::crd()).expect("ShardAutoscaler CRD serializes"),
    ];

    for (i, crd) in crds.iter().enumerate() {
        if i > 0 {
            println!("---");
        }
        print!("{}", serde_yaml::to_string(crd).expect("CRD document serializes"));
    }
}
