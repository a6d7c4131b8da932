use std::time::Duration;

use crate::escape::{html_escape, truncate_runes};

const TITLE_RUNE_LIMIT: usize = 200;

/// Everything [`enrich`] needs, decoupled from the notifier's own
/// `Notification` type so this crate stays free of a dependency back on
/// `notifier-core`. The title here is already resolved (the fallback lookup
/// against the command index is the caller's job) and unescaped; the body is
/// HTML the caller has opted into (never escaped here, per the notification
/// contract's `Message` field).
#[derive(Debug, Clone)]
pub struct EnrichInput {
    pub title: Option<String>,
    pub body: String,
    pub cancelable: bool,
    pub instance_id: Option<String>,
    pub elapsed: Option<Duration>,
    pub error_occurred: bool,
}

fn format_elapsed(elapsed: Duration) -> String {
    let total_secs = elapsed.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;

    let mut parts = Vec::new();
    if hours > 0 {
        parts.push(format!("{hours}시간"));
    }
    if minutes > 0 {
        parts.push(format!("{minutes}분"));
    }
    if hours > 0 || minutes > 0 {
        if seconds > 0 {
            parts.push(format!("{seconds}초"));
        }
    } else {
        parts.push(format!("{seconds}초"));
    }

    format!(" ({} 지남)", parts.join(" "))
}

/// Builds the wire text for a notification in the fixed order the product
/// contract requires: title, cancel affordance, elapsed time, error banner.
pub fn enrich(input: EnrichInput) -> String {
    let mut text = match input.title.as_deref() {
        Some(raw_title) if !raw_title.is_empty() => {
            let escaped = html_escape(truncate_runes(raw_title, TITLE_RUNE_LIMIT));
            format!("<b>【 {escaped} 】</b>\n\n{}", input.body)
        }
        _ => input.body,
    };

    if input.cancelable {
        if let Some(id) = input.instance_id.as_deref().filter(|id| !id.is_empty()) {
            text.push_str("\n\n/cancel_");
            text.push_str(id);
        }
    }

    if let Some(elapsed) = input.elapsed.filter(|e| !e.is_zero()) {
        text.push_str(&format_elapsed(elapsed));
    }

    if input.error_occurred {
        text = format!("{text}\n\n*** 오류가 발생하였습니다. ***");
    }

    text
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base(body: &str) -> EnrichInput {
        EnrichInput {
            title: None,
            body: body.to_string(),
            cancelable: false,
            instance_id: None,
            elapsed: None,
            error_occurred: false,
        }
    }

    #[test]
    fn plain_message_is_untouched() {
        assert_eq!(enrich(base("hello")), "hello");
    }

    #[test]
    fn title_is_escaped_and_wrapped() {
        let mut input = base("body text");
        input.title = Some("<script>alert(1)</script>".to_string());
        assert_eq!(
            enrich(input),
            "<b>【 &lt;script&gt;alert(1)&lt;/script&gt; 】</b>\n\nbody text"
        );
    }

    #[test]
    fn title_truncation_precedes_escaping() {
        // A raw title long enough that truncation lands mid-entity if done
        // after escaping; truncating first avoids splitting `&lt;`.
        let raw_title = format!("{}<", "a".repeat(200));
        let mut input = base("body");
        input.title = Some(raw_title);
        let text = enrich(input);
        assert!(!text.contains("&l\u{2026}"));
        assert!(text.contains(&"a".repeat(200)));
        assert!(!text.contains('<'));
    }

    #[test]
    fn empty_title_is_omitted() {
        let mut input = base("body");
        input.title = Some(String::new());
        assert_eq!(enrich(input), "body");
    }

    #[test]
    fn cancel_affordance_requires_instance_id() {
        let mut input = base("body");
        input.cancelable = true;
        assert_eq!(enrich(input.clone()), "body");

        input.instance_id = Some("abc123".to_string());
        assert_eq!(enrich(input), "body\n\n/cancel_abc123");
    }

    #[test]
    fn elapsed_zero_is_omitted() {
        let mut input = base("body");
        input.elapsed = Some(Duration::ZERO);
        assert_eq!(enrich(input), "body");
    }

    #[test]
    fn elapsed_formatting_omits_zero_higher_units() {
        let mut input = base("body");
        input.elapsed = Some(Duration::from_secs(0));
        input.elapsed = Some(Duration::from_secs(5));
        assert_eq!(enrich(input.clone()), "body (5초 지남)");

        input.elapsed = Some(Duration::from_secs(3 * 60));
        assert_eq!(enrich(input.clone()), "body (3분 지남)");

        input.elapsed = Some(Duration::from_secs(3600 + 5 * 60 + 30));
        assert_eq!(enrich(input.clone()), "body (1시간 5분 30초 지남)");

        input.elapsed = Some(Duration::from_secs(3600));
        assert_eq!(enrich(input), "body (1시간 지남)");
    }

    #[test]
    fn error_banner_wraps_the_whole_message() {
        let mut input = base("something failed");
        input.error_occurred = true;
        assert_eq!(
            enrich(input),
            "something failed\n\n*** 오류가 발생하였습니다. ***"
        );
    }

    #[test]
    fn full_order_title_cancel_elapsed_error() {
        let input = EnrichInput {
            title: Some("Job".to_string()),
            body: "done".to_string(),
            cancelable: true,
            instance_id: Some("xyz".to_string()),
            elapsed: Some(Duration::from_secs(61)),
            error_occurred: true,
        };
        let text = enrich(input);
        assert_eq!(
            text,
            "<b>【 Job 】</b>\n\ndone\n\n/cancel_xyz (1분 1초 지남)\n\n*** 오류가 발생하였습니다. ***"
        );
    }
}
