use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};
use k8s_openapi::chrono::Utc;

/// Insert or update a condition by `type_`, following the standard
/// Kubernetes convention: `lastTransitionTime` only moves forward when
/// `status` actually changes.
pub fn set_condition(conditions: &mut Vec<Condition>, type_: &str, status: bool, reason: &str, message: impl Into<String>) {
    let status_str = if status { "True" } else { "False" }.to_string();
    let now = Time(Utc::now());
    if let Some(existing) = conditions.iter_mut().find(|c| c.type_ == type_) {
        if existing.status != status_str {
            existing.status = status_str;
            existing.last_transition_time = now;
        }
        existing.reason = Some(reason.to_string());
        existing.message = message.into();
    } else {
        conditions.push(Condition {
            type_: type_.to_string(),
            status: status_str,
            reason: Some(reason.to_string()),
            message: message.into(),
            last_transition_time: now,
            observed_generation: None,
        });
    }
}

pub fn condition_is_true(conditions: &[Condition], type_: &str) -> bool {
    conditions
        .iter()
        .find(|c| c.type_ == type_)
        .is_some_and(|c| c.status == "True")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_condition_is_appended() {
        let mut conditions = Vec::new();
        set_condition(&mut conditions, "Installed", true, "InstallSucceeded", "ok");
        assert_eq!(conditions.len(), 1);
        assert!(condition_is_true(&conditions, "Installed"));
    }

    #[test]
    fn transition_time_moves_only_on_status_change() {
        let mut conditions = Vec::new();
        set_condition(&mut conditions, "Installed", false, "Pending", "waiting");
        let first_time = conditions[0].last_transition_time.clone();
        set_condition(&mut conditions, "Installed", false, "Pending", "still waiting");
        assert_eq!(conditions[0].last_transition_time, first_time);
        assert_eq!(conditions[0].message, "still waiting");
        set_condition(&mut conditions, "Installed", true, "InstallSucceeded", "ok");
        assert_ne!(conditions[0].status, "False");
    }
}
