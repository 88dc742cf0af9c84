//! Email template rendering engine.
//!
//! Handlebars templates for every [`MessageKind`]. Subjects and plain-text
//! bodies are rendered without HTML escaping; HTML bodies are escaped.

use crate::error::{NotificationError, NotificationResult};
use crate::models::{MessageKind, NotificationKind};
use handlebars::{handlebars_helper, no_escape, Handlebars};
use serde_json::Value;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

/// Rendered email content.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedEmail {
    /// HTML body content.
    pub html: String,
    /// Plain text body content.
    pub text: String,
    /// Email subject line.
    pub subject: String,
}

/// Turns a message kind and its context into subject and bodies.
///
/// The notifier never looks inside the rendered output.
pub trait MessageRenderer: Send + Sync {
    fn render(&self, kind: MessageKind, context: &Value) -> NotificationResult<RenderedEmail>;
}

handlebars_helper!(kind_label: |kind: str| {
    match NotificationKind::from_str(kind) {
        Ok(NotificationKind::SignupConfirmation) => "New registrations",
        Ok(NotificationKind::UnregisterConfirmation) => "Unregistrations",
        Ok(NotificationKind::ActivityChanges) => "Activity changes",
        Ok(NotificationKind::Reminders) => "Upcoming sessions",
        Ok(NotificationKind::WeeklyDigest) => "Weekly summary",
        Ok(NotificationKind::NewActivities) => "New activities",
        Ok(NotificationKind::Attendance) => "Attendance",
        Err(_) => "Updates",
    }
});

/// Template engine for rendering email templates.
#[derive(Clone)]
pub struct TemplateEngine {
    html: Arc<Handlebars<'static>>,
    plain: Arc<Handlebars<'static>>,
}

impl TemplateEngine {
    /// Create a new template engine with all templates registered.
    pub fn new() -> NotificationResult<Self> {
        let mut html = Handlebars::new();
        let mut plain = Handlebars::new();
        plain.register_escape_fn(no_escape);

        for registry in [&mut html, &mut plain] {
            registry.register_helper("kind_label", Box::new(kind_label));
        }

        for (name, subject, html_body, text_body) in TEMPLATES {
            plain.register_template_string(&format!("{}_subject", name), subject)?;
            plain.register_template_string(&format!("{}_text", name), format!("{}{}", text_body, TEXT_FOOTER))?;
            html.register_template_string(
                &format!("{}_html", name),
                format!("{}{}{}", HTML_HEADER, html_body, HTML_FOOTER),
            )?;
        }

        Ok(Self {
            html: Arc::new(html),
            plain: Arc::new(plain),
        })
    }

    /// Whether templates exist for a message kind.
    pub fn supports(&self, kind: MessageKind) -> bool {
        let name = kind.template_name();
        self.plain.has_template(&format!("{}_subject", name))
            && self.html.has_template(&format!("{}_html", name))
    }
}

impl MessageRenderer for TemplateEngine {
    fn render(&self, kind: MessageKind, context: &Value) -> NotificationResult<RenderedEmail> {
        let name = kind.template_name();
        debug!(template = %name, "Rendering email");

        if !self.supports(kind) {
            return Err(NotificationError::Template(format!("No template registered for {}", name)));
        }

        let subject = self.plain.render(&format!("{}_subject", name), context)?;
        let text = self.plain.render(&format!("{}_text", name), context)?;
        let html = self.html.render(&format!("{}_html", name), context)?;

        Ok(RenderedEmail {
            html,
            text,
            subject: subject.trim().to_string(),
        })
    }
}

// ============================================================================
// Email Templates
// ============================================================================

const HTML_HEADER: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="UTF-8">
  <meta name="viewport" content="width=device-width, initial-scale=1.0">
</head>
<body style="margin: 0; padding: 0; font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; background-color: #f4f4f5;">
  <table role="presentation" width="100%" cellspacing="0" cellpadding="0" style="max-width: 600px; margin: 0 auto; padding: 40px 20px;">
    <tr>
      <td style="background-color: #ffffff; border-radius: 8px; padding: 40px; box-shadow: 0 2px 4px rgba(0,0,0,0.1);">
        <p style="color: #1a237e; font-size: 14px; font-weight: 600; text-align: center; margin: 0 0 24px 0;">Mergington High School</p>
"#;

const HTML_FOOTER: &str = r#"
      </td>
    </tr>
    <tr>
      <td style="padding: 24px 0; text-align: center;">
        <p style="color: #a1a1aa; font-size: 11px; margin: 0;">
          You are receiving this because of your email preferences at Mergington High School.
        </p>
      </td>
    </tr>
  </table>
</body>
</html>"#;

const TEXT_FOOTER: &str = r#"

---
You are receiving this because of your email preferences at Mergington High School."#;

/// (template name, subject, html body, text body)
const TEMPLATES: [(&str, &str, &str, &str); 10] = [
    (
        "signup_confirmation",
        "Confirmed: {{activity_name}} Registration",
        r#"<h1 style="color: #18181b; font-size: 22px; margin: 0 0 16px 0;">You're registered for {{activity_name}}!</h1>
        <p style="color: #52525b; font-size: 16px; line-height: 24px;">Hi {{#if student_name}}{{student_name}}{{else}}there{{/if}}, your spot is confirmed.</p>
        <p style="color: #52525b; font-size: 14px;"><strong>Schedule:</strong> {{schedule}}</p>
        {{#if description}}<p style="color: #71717a; font-size: 14px;">{{description}}</p>{{/if}}"#,
        r#"You're registered for {{activity_name}}!

Hi {{#if student_name}}{{student_name}}{{else}}there{{/if}}, your spot is confirmed.

Schedule: {{schedule}}
{{#if description}}{{description}}{{/if}}"#,
    ),
    (
        "unregister_confirmation",
        "Unregistration Confirmed: {{activity_name}}",
        r#"<h1 style="color: #18181b; font-size: 22px; margin: 0 0 16px 0;">You've left {{activity_name}}</h1>
        <p style="color: #52525b; font-size: 16px; line-height: 24px;">Hi {{#if student_name}}{{student_name}}{{else}}there{{/if}}, you are no longer signed up.</p>
        <p style="color: #71717a; font-size: 14px;">The activity met {{schedule}}. You can sign up again any time while spots are open.</p>"#,
        r#"You've left {{activity_name}}

Hi {{#if student_name}}{{student_name}}{{else}}there{{/if}}, you are no longer signed up.
The activity met {{schedule}}. You can sign up again any time while spots are open."#,
    ),
    (
        "activity_changes",
        "Important Update: {{activity_name}}",
        r#"<h1 style="color: #18181b; font-size: 22px; margin: 0 0 16px 0;">Update for {{activity_name}}</h1>
        <p style="color: #52525b; font-size: 16px; line-height: 24px;">{{change_description}}</p>
        {{#if new_schedule}}<p style="color: #52525b; font-size: 14px;"><strong>New schedule:</strong> {{new_schedule}}</p>{{/if}}"#,
        r#"Update for {{activity_name}}

{{change_description}}
{{#if new_schedule}}New schedule: {{new_schedule}}{{/if}}"#,
    ),
    (
        "reminders",
        "Reminder: {{activity_name}} Coming Up!",
        r#"<h1 style="color: #18181b; font-size: 22px; margin: 0 0 16px 0;">{{activity_name}} is coming up</h1>
        <p style="color: #52525b; font-size: 16px; line-height: 24px;">Next session: <strong>{{next_session}}</strong></p>
        <p style="color: #71717a; font-size: 14px;">Regular schedule: {{schedule}}</p>"#,
        r#"{{activity_name}} is coming up

Next session: {{next_session}}
Regular schedule: {{schedule}}"#,
    ),
    (
        "weekly_digest",
        "Weekly Activity Digest: {{week_start}} - {{week_end}}",
        r#"<h1 style="color: #18181b; font-size: 22px; margin: 0 0 16px 0;">Your activities this week</h1>
        <p style="color: #52525b; font-size: 14px;">{{week_start}} to {{week_end}}</p>
        <table width="100%" cellspacing="0" cellpadding="0">
          {{#each activities}}
          <tr>
            <td style="padding: 12px 0; border-bottom: 1px solid #e4e4e7;">
              <p style="color: #18181b; font-size: 14px; font-weight: 600; margin: 0;">{{this.name}}</p>
              <p style="color: #71717a; font-size: 12px; margin: 4px 0 0 0;">{{this.schedule}}</p>
            </td>
          </tr>
          {{/each}}
        </table>"#,
        r#"Your activities this week ({{week_start}} to {{week_end}})

{{#each activities}}
- {{this.name}}: {{this.schedule}}
{{/each}}"#,
    ),
    (
        "new_activities",
        "New Activity Available: {{activity_name}}",
        r#"<h1 style="color: #18181b; font-size: 22px; margin: 0 0 16px 0;">New: {{activity_name}}</h1>
        <p style="color: #52525b; font-size: 16px; line-height: 24px;">{{description}}</p>
        <p style="color: #52525b; font-size: 14px;"><strong>Schedule:</strong> {{schedule}}<br><strong>Spots:</strong> {{max_participants}}</p>
        <p style="text-align: center;"><a href="{{portal_url}}" style="display: inline-block; background-color: #1a237e; color: #ffffff; padding: 12px 32px; text-decoration: none; border-radius: 6px;">Sign up</a></p>"#,
        r#"New: {{activity_name}}

{{description}}

Schedule: {{schedule}}
Spots: {{max_participants}}

Sign up: {{portal_url}}"#,
    ),
    (
        "attendance",
        "Attendance Notification: {{student_name}} - {{activity_name}}",
        r#"<h1 style="color: #18181b; font-size: 22px; margin: 0 0 16px 0;">Attendance for {{student_name}}</h1>
        <p style="color: #52525b; font-size: 16px; line-height: 24px;">{{activity_name}} on {{date}}: <strong>{{attendance_status}}</strong></p>
        {{#if note}}<p style="color: #71717a; font-size: 14px;">{{note}}</p>{{/if}}"#,
        r#"Attendance for {{student_name}}

{{activity_name}} on {{date}}: {{attendance_status}}
{{#if note}}Note: {{note}}{{/if}}"#,
    ),
    (
        "daily_digest",
        "Your daily activity digest ({{count}} updates)",
        r#"<h1 style="color: #18181b; font-size: 22px; margin: 0 0 16px 0;">Today's updates</h1>
        {{#each groups}}
        <h2 style="color: #18181b; font-size: 16px; margin: 16px 0 8px 0;">{{kind_label this.kind}} ({{this.count}})</h2>
        <ul style="color: #52525b; font-size: 14px; margin: 0; padding-left: 20px;">
          {{#each this.items}}<li>{{this.activity_name}}{{#if this.next_session}}, {{this.next_session}}{{/if}}{{#if this.change_description}}: {{this.change_description}}{{/if}}</li>{{/each}}
        </ul>
        {{/each}}"#,
        r#"Today's updates

{{#each groups}}
{{kind_label this.kind}} ({{this.count}})
{{#each this.items}}
- {{this.activity_name}}{{#if this.next_session}}, {{this.next_session}}{{/if}}{{#if this.change_description}}: {{this.change_description}}{{/if}}
{{/each}}
{{/each}}"#,
    ),
    (
        "weekly_updates",
        "Your weekly activity updates ({{count}} updates)",
        r#"<h1 style="color: #18181b; font-size: 22px; margin: 0 0 16px 0;">This week's updates</h1>
        {{#each groups}}
        <h2 style="color: #18181b; font-size: 16px; margin: 16px 0 8px 0;">{{kind_label this.kind}} ({{this.count}})</h2>
        <ul style="color: #52525b; font-size: 14px; margin: 0; padding-left: 20px;">
          {{#each this.items}}<li>{{this.activity_name}}{{#if this.change_description}}: {{this.change_description}}{{/if}}</li>{{/each}}
        </ul>
        {{/each}}"#,
        r#"This week's updates

{{#each groups}}
{{kind_label this.kind}} ({{this.count}})
{{#each this.items}}
- {{this.activity_name}}{{#if this.change_description}}: {{this.change_description}}{{/if}}
{{/each}}
{{/each}}"#,
    ),
    (
        "announcement",
        "{{#if subject}}{{subject}}{{else}}Announcement from Mergington High School{{/if}}",
        r#"{{#if title}}<h1 style="color: #18181b; font-size: 22px; margin: 0 0 16px 0;">{{title}}</h1>{{/if}}
        <p style="color: #52525b; font-size: 16px; line-height: 24px; white-space: pre-line;">{{message}}</p>
        {{#if link_url}}<p style="text-align: center;"><a href="{{link_url}}" style="display: inline-block; background-color: #1a237e; color: #ffffff; padding: 12px 32px; text-decoration: none; border-radius: 6px;">{{#if link_text}}{{link_text}}{{else}}Learn more{{/if}}</a></p>{{/if}}"#,
        r#"{{#if title}}{{title}}

{{/if}}{{message}}
{{#if link_url}}
{{#if link_text}}{{link_text}}{{else}}Learn more{{/if}}: {{link_url}}{{/if}}"#,
    ),
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DigestClass;
    use serde_json::json;

    #[test]
    fn test_every_message_kind_has_templates() {
        let engine = TemplateEngine::new().unwrap();
        for kind in MessageKind::all() {
            assert!(engine.supports(kind), "missing templates for {}", kind);
        }
    }

    #[test]
    fn test_signup_subject() {
        let engine = TemplateEngine::new().unwrap();
        let rendered = engine
            .render(
                MessageKind::Event(NotificationKind::SignupConfirmation),
                &json!({ "activity_name": "Chess Club", "schedule": "Fridays, 3:30 PM - 5:00 PM" }),
            )
            .unwrap();

        assert_eq!(rendered.subject, "Confirmed: Chess Club Registration");
        assert!(rendered.html.contains("Fridays, 3:30 PM - 5:00 PM"));
        assert!(rendered.text.contains("Hi there"));
    }

    #[test]
    fn test_subject_is_not_html_escaped() {
        let engine = TemplateEngine::new().unwrap();
        let rendered = engine
            .render(
                MessageKind::Event(NotificationKind::Attendance),
                &json!({ "student_name": "Emma", "activity_name": "Art & Design" }),
            )
            .unwrap();

        assert_eq!(rendered.subject, "Attendance Notification: Emma - Art & Design");
        assert!(rendered.html.contains("Art &amp; Design"));
    }

    #[test]
    fn test_weekly_summary_subject() {
        let engine = TemplateEngine::new().unwrap();
        let rendered = engine
            .render(
                MessageKind::Event(NotificationKind::WeeklyDigest),
                &json!({
                    "week_start": "2024-01-08",
                    "week_end": "2024-01-14",
                    "activities": [{ "name": "Chess Club", "schedule": "Fridays" }]
                }),
            )
            .unwrap();

        assert_eq!(rendered.subject, "Weekly Activity Digest: 2024-01-08 - 2024-01-14");
        assert!(rendered.text.contains("- Chess Club: Fridays"));
    }

    #[test]
    fn test_announcement_renders_message_and_link() {
        let engine = TemplateEngine::new().unwrap();
        let rendered = engine
            .render(
                MessageKind::Announcement,
                &json!({
                    "subject": "Snow day",
                    "title": "No activities today",
                    "message": "All clubs are cancelled.",
                    "link_url": "https://mergington.edu/calendar"
                }),
            )
            .unwrap();

        assert_eq!(rendered.subject, "Snow day");
        assert!(rendered.text.starts_with("No activities today"));
        assert!(rendered.text.contains("Learn more: https://mergington.edu/calendar"));
        assert!(rendered.html.contains("All clubs are cancelled."));
    }

    #[test]
    fn test_daily_digest_groups() {
        let engine = TemplateEngine::new().unwrap();
        let rendered = engine
            .render(
                MessageKind::Digest(DigestClass::Daily),
                &json!({
                    "count": 2,
                    "groups": [{
                        "kind": "reminders",
                        "count": 2,
                        "items": [{ "activity_name": "Chess Club" }, { "activity_name": "Art Club" }]
                    }]
                }),
            )
            .unwrap();

        assert_eq!(rendered.subject, "Your daily activity digest (2 updates)");
        assert!(rendered.text.contains("Upcoming sessions (2)"));
        let chess = rendered.text.find("Chess Club").unwrap();
        let art = rendered.text.find("Art Club").unwrap();
        assert!(chess < art);
    }
}
