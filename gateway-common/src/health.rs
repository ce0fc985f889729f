//! Health endpoint vocabulary.

/// Bodies a backend's `/healthz` may answer with (compared case-insensitively,
/// after trimming). An empty body is also accepted.
pub const HEALTHY_BODIES: [&str; 3] = ["ok", "okay", "healthy"];

/// Judge a health probe answer.
///
/// Healthy means HTTP 200 and a body that is empty or one of [`HEALTHY_BODIES`].
pub fn is_healthy_response(status: u16, body: &str) -> bool {
    if status != 200 {
        return false;
    }
    let body = body.trim();
    body.is_empty() || HEALTHY_BODIES.iter().any(|b| body.eq_ignore_ascii_case(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepted_bodies() {
        assert!(is_healthy_response(200, ""));
        assert!(is_healthy_response(200, "ok"));
        assert!(is_healthy_response(200, "OK\n"));
        assert!(is_healthy_response(200, "  Okay "));
        assert!(is_healthy_response(200, "HEALTHY"));
    }

    #[test]
    fn test_rejected_answers() {
        assert!(!is_healthy_response(503, "ok"));
        assert!(!is_healthy_response(204, ""));
        assert!(!is_healthy_response(200, "degraded"));
        assert!(!is_healthy_response(200, r#"{"status":"ok"}"#));
    }
}
