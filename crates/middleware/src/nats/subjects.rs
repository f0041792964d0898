/// Check that a topic can be published verbatim as NATS subject tokens.
///
/// Topics are never rewritten: two distinct topics always land on two
/// distinct subjects, and a topic NATS cannot carry is refused.
pub fn validate_subject_token(topic: &str) -> Result<(), String> {
    if topic.is_empty() {
        return Err("topic is empty".to_string());
    }
    for token in topic.split('.') {
        if token.is_empty() {
            return Err(format!("topic '{}' has an empty subject token", topic));
        }
        if let Some(c) = token
            .chars()
            .find(|c| matches!(c, '*' | '>') || c.is_whitespace() || c.is_control())
        {
            return Err(format!("topic '{}' contains {:?}, not allowed in a subject", topic, c));
        }
    }
    Ok(())
}

/// Maps topics onto NATS subjects under an optional prefix.
pub struct SubjectBuilder {
    /// Pre-computed "{prefix}." or empty
    prefix: String,
}

impl SubjectBuilder {
    pub fn new(prefix: Option<&str>) -> Self {
        let prefix = match prefix.map(|p| p.trim_end_matches('.')) {
            Some(p) if !p.is_empty() => format!("{}.", p),
            _ => String::new(),
        };
        Self { prefix }
    }

    /// Subject a topic is published on: {prefix}.{topic}
    pub fn topic(&self, topic: &str) -> Result<String, String> {
        validate_subject_token(topic)?;
        Ok(format!("{}{}", self.prefix, topic))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_without_prefix() {
        let builder = SubjectBuilder::new(None);
        assert_eq!(builder.topic("temperature").unwrap(), "temperature");
    }

    #[test]
    fn test_topic_with_prefix() {
        let builder = SubjectBuilder::new(Some("prod.sensors"));
        assert_eq!(builder.topic("temperature").unwrap(), "prod.sensors.temperature");
    }

    #[test]
    fn test_trailing_dot_in_prefix() {
        let builder = SubjectBuilder::new(Some("prod."));
        assert_eq!(builder.topic("pressure").unwrap(), "prod.pressure");
    }

    #[test]
    fn test_empty_prefix_ignored() {
        let builder = SubjectBuilder::new(Some(""));
        assert_eq!(builder.topic("pressure").unwrap(), "pressure");
    }

    #[test]
    fn test_hierarchical_topic_kept() {
        let builder = SubjectBuilder::new(None);
        assert_eq!(builder.topic("line.point_data").unwrap(), "line.point_data");
    }

    #[test]
    fn test_lookalike_topics_stay_distinct() {
        let builder = SubjectBuilder::new(Some("prod"));
        // Previously both pairs collapsed onto one subject
        assert!(builder.topic("cpu load").is_err());
        assert_eq!(builder.topic("cpu_load").unwrap(), "prod.cpu_load");
        assert!(builder.topic("cpu*").is_err());
        assert_eq!(builder.topic("cpu_").unwrap(), "prod.cpu_");
        assert_ne!(builder.topic("Cpu").unwrap(), builder.topic("cpu").unwrap());
    }

    #[test]
    fn test_empty_tokens_rejected() {
        for topic in ["", ".t", "t.", "a..b", "."] {
            assert!(validate_subject_token(topic).is_err(), "{:?} accepted", topic);
        }
    }

    #[test]
    fn test_wildcard_and_control_chars_rejected() {
        for topic in ["a.>", "a.*", "tab\tbed", "new\nline"] {
            assert!(validate_subject_token(topic).is_err(), "{:?} accepted", topic);
        }
        assert!(validate_subject_token("sensor-1.temp_c").is_ok());
    }
}
