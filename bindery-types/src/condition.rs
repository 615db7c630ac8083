use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// `{type, status, reason, message, lastTransitionTime}` (§6).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: ConditionStatus,
    pub reason: String,
    pub message: String,
    #[serde(rename = "lastTransitionTime")]
    pub last_transition_time: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize, JsonSchema)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

/// A `Vec<Condition>` with the `SetCondition` merge behaviour from §6:
/// `lastTransitionTime` only moves forward when `status` actually changes.
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct Conditions(pub Vec<Condition>);

impl Conditions {
    pub fn get(&self, type_: &str) -> Option<&Condition> {
        self.0.iter().find(|c| c.type_ == type_)
    }

    pub fn is_true(&self, type_: &str) -> bool {
        matches!(self.get(type_), Some(c) if c.status == ConditionStatus::True)
    }

    /// Sets `type_` to `status`/`reason`/`message` at `now`. Only bumps
    /// `last_transition_time` if the status value changed (or the condition
    /// is new) — this is the idempotency property tested in §8: two
    /// reconciles with no underlying change must not touch
    /// `lastTransitionTime` on the second pass.
    pub fn set(&mut self, type_: &str, status: ConditionStatus, reason: &str, message: &str, now: DateTime<Utc>) {
        if let Some(existing) = self.0.iter_mut().find(|c| c.type_ == type_) {
            let transitioned = existing.status != status;
            existing.reason = reason.to_string();
            existing.message = message.to_string();
            if transitioned {
                existing.status = status;
                existing.last_transition_time = now;
            }
        } else {
            self.0.push(Condition {
                type_: type_.to_string(),
                status,
                reason: reason.to_string(),
                message: message.to_string(),
                last_transition_time: now,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn set_condition_only_bumps_transition_time_on_change() {
        let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2026, 1, 1, 0, 1, 0).unwrap();
        let mut conds = Conditions::default();
        conds.set("Ready", ConditionStatus::True, "Done", "ok", t0);
        let first = conds.get("Ready").unwrap().last_transition_time;
        // same status, later call -> lastTransitionTime untouched
        conds.set("Ready", ConditionStatus::True, "Done", "ok still", t1);
        assert_eq!(conds.get("Ready").unwrap().last_transition_time, first);
        assert_eq!(conds.get("Ready").unwrap().message, "ok still");

        // status changes -> lastTransitionTime moves
        conds.set("Ready", ConditionStatus::False, "Waiting", "not yet", t1);
        assert_eq!(conds.get("Ready").unwrap().last_transition_time, t1);
    }
}
