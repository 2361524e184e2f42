use crate::error::Result;

/// Pluggable confirmation backend asked before a destructive restart
pub trait RestartConfirmation: Send + Sync {
    /// Ask whether the transcript, currently holding `message_count` messages, may be cleared
    fn confirm_restart(&self, message_count: usize) -> Result<bool>;

    /// Get the name of this backend
    fn name(&self) -> &str;
}

/// Always allows the restart
#[derive(Debug, Default)]
pub struct AutoConfirm;

impl AutoConfirm {
    pub fn new() -> Self {
        Self
    }
}

impl RestartConfirmation for AutoConfirm {
    fn confirm_restart(&self, _message_count: usize) -> Result<bool> {
        Ok(true)
    }

    fn name(&self) -> &str {
        "auto-confirm"
    }
}

/// Always refuses the restart
#[derive(Debug, Default)]
pub struct AutoDecline;

impl AutoDecline {
    pub fn new() -> Self {
        Self
    }
}

impl RestartConfirmation for AutoDecline {
    fn confirm_restart(&self, _message_count: usize) -> Result<bool> {
        Ok(false)
    }

    fn name(&self) -> &str {
        "auto-decline"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auto_confirm() {
        let confirm = AutoConfirm::new();
        assert!(confirm.confirm_restart(3).unwrap());
        assert_eq!(confirm.name(), "auto-confirm");
    }

    #[test]
    fn test_auto_decline() {
        let decline = AutoDecline::new();
        assert!(!decline.confirm_restart(3).unwrap());
        assert_eq!(decline.name(), "auto-decline");
    }

    #[test]
    fn test_trait_object() {
        let backends: Vec<Box<dyn RestartConfirmation>> = vec![Box::new(AutoConfirm), Box::new(AutoDecline)];
        let answers: Vec<bool> = backends.iter().map(|b| b.confirm_restart(2).unwrap()).collect();
        assert_eq!(answers, vec![true, false]);
    }
}
