pub fn parse_positive_u64(value: &str) -> Result<u64, String> {
    let parsed = value
        .parse::<u64>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

/// Accepts `owner/repo`, trimming whitespace and a trailing `.git`.
pub fn parse_repo_slug(value: &str) -> Result<String, String> {
    let trimmed = value.trim().trim_end_matches(".git");
    let Some((owner, name)) = trimmed.split_once('/') else {
        return Err(format!("expected owner/repo, got '{value}'"));
    };
    if owner.is_empty() || name.is_empty() || name.contains('/') {
        return Err(format!("expected owner/repo, got '{value}'"));
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::{parse_positive_u64, parse_repo_slug};

    #[test]
    fn unit_parse_repo_slug_requires_owner_and_name() {
        assert_eq!(parse_repo_slug(" acme/widgets.git "), Ok("acme/widgets".to_string()));
        assert!(parse_repo_slug("acme").is_err());
        assert!(parse_repo_slug("acme/widgets/extra").is_err());
        assert!(parse_repo_slug("/widgets").is_err());
    }

    #[test]
    fn unit_parse_positive_u64_rejects_zero() {
        assert_eq!(parse_positive_u64("3600"), Ok(3600));
        assert!(parse_positive_u64("0").is_err());
        assert!(parse_positive_u64("-1").is_err());
    }
}
