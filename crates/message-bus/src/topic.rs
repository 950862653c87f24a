/// A logical topic: an environment key plus the semantic default name used
/// when the key is unset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Topic {
    env: &'static str,
    default: &'static str,
}

impl Topic {
    pub const fn new(env: &'static str, default: &'static str) -> Self {
        Self { env, default }
    }

    pub fn env_key(&self) -> &'static str {
        self.env
    }

    pub fn semantic_name(&self) -> &'static str {
        self.default
    }

    /// The concrete topic name for this process.
    pub fn name(&self) -> String {
        match std::env::var(self.env) {
            Ok(name) if !name.trim().is_empty() => name,
            _ => self.default.to_string(),
        }
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_env_falls_back_to_semantic_name() {
        let topic = Topic::new("MESSAGE_BUS_TEST_UNSET_TOPIC", "test.command");
        assert_eq!(topic.name(), "test.command");
        assert_eq!(topic.env_key(), "MESSAGE_BUS_TEST_UNSET_TOPIC");
    }
}
