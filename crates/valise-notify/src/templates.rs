//! Email composition. Bodies are deliberately plain: the in-app inbox is
//! the authoritative channel and these are nudges back into it.

use crate::provider::OutboundEmail;

/// Truncate a message preview for the email body.
const PREVIEW_MAX_CHARS: usize = 120;

pub fn first_message_email(
    to: &str,
    recipient_id: &str,
    sender_name: &str,
    source_title: Option<&str>,
    body_preview: &str,
    conversation_id: &str,
    message_id: &str,
) -> OutboundEmail {
    let subject = match source_title {
        Some(title) => format!("{sender_name} sent you a message about \"{title}\""),
        None => format!("{sender_name} sent you a message"),
    };
    let preview = truncate(body_preview, PREVIEW_MAX_CHARS);

    OutboundEmail {
        to: to.to_string(),
        subject,
        html: format!(
            "<p><strong>{sender_name}</strong> wrote:</p>\
             <blockquote>{preview}</blockquote>\
             <p>Reply from your inbox to keep the conversation going.</p>"
        ),
        text: format!("{sender_name} wrote:\n\n{preview}\n\nReply from your inbox to keep the conversation going."),
        category: "first-message".to_string(),
        dedupe_key: format!("first-message:{conversation_id}:{message_id}"),
        user_id: Some(recipient_id.to_string()),
    }
}

pub fn offer_action_email(
    to: &str,
    recipient_id: &str,
    action_label: &str,
    offer_title: &str,
    dedupe_key: &str,
) -> OutboundEmail {
    let subject = format!("Your offer \"{offer_title}\" was {action_label}");

    OutboundEmail {
        to: to.to_string(),
        subject: subject.clone(),
        html: format!("<p>{subject}.</p><p>Open the app for details.</p>"),
        text: format!("{subject}.\n\nOpen the app for details."),
        category: "offer".to_string(),
        dedupe_key: dedupe_key.to_string(),
        user_id: Some(recipient_id.to_string()),
    }
}

pub fn test_email(to: &str, dedupe_key: &str) -> OutboundEmail {
    OutboundEmail {
        to: to.to_string(),
        subject: "Valise notification smoke test".to_string(),
        html: "<p>If you can read this, outbound email works.</p>".to_string(),
        text: "If you can read this, outbound email works.".to_string(),
        category: "ops-test".to_string(),
        dedupe_key: dedupe_key.to_string(),
        user_id: None,
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max_chars).collect();
        format!("{cut}…")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_message_subject_includes_the_listing_title() {
        let email = first_message_email(
            "y@example.com",
            "u2",
            "Mika",
            Some("Nintendo handheld from Osaka"),
            "Hi! Is this still available?",
            "c1",
            "m1",
        );
        assert!(email.subject.contains("Nintendo handheld from Osaka"));
        assert_eq!(email.dedupe_key, "first-message:c1:m1");
        assert_eq!(email.category, "first-message");
    }

    #[test]
    fn long_previews_are_truncated() {
        let long_body = "a".repeat(500);
        let email = first_message_email("y@example.com", "u2", "Mika", None, &long_body, "c1", "m1");
        assert!(email.text.chars().count() < 500);
        assert!(email.text.contains('…'));
    }
}
