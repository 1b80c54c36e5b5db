//! Email template rendering
//!
//! Templates are registered once at construction and rendered against the
//! event payload. Content is deliberately plain; wording and branding are a
//! product concern, the machinery here is not.

use handlebars::Handlebars;

use crate::bus::routing_keys;
use crate::{Error, Result};

const RESERVATION_CREATED: &str = "\
Hi {{userName}},

Your reservation {{reservationCode}} for {{quantity}} x {{itemName}} is held \
until {{expiresAt}}. Total: {{totalPrice}}.

Check out before the hold expires to complete your purchase.";

const RESERVATION_CONFIRMED: &str = "\
Hi {{userName}},

Your purchase of {{quantity}} x {{itemName}} is confirmed. \
Reservation {{reservationCode}}, total {{totalPrice}}.";

const RESERVATION_CANCELLED: &str = "\
Hi {{userName}},

Reservation {{reservationCode}} for {{itemName}} was cancelled.\
{{#if cancellationReason}} Reason: {{cancellationReason}}.{{/if}}";

const RESERVATION_EXPIRED: &str = "\
Hi {{userName}},

Reservation {{reservationCode}} for {{itemName}} expired and the held stock \
was released.";

const EMAIL_VERIFICATION: &str = "\
Hi {{userName}},

Verify your address with code {{code}}.";

const EMAIL_PASSWORD_RESET: &str = "\
Hi {{userName}},

Use code {{code}} to reset your password. It expires in {{expiresInMinutes}} minutes.";

const EMAIL_PASSWORD_CHANGED: &str = "\
Hi {{userName}},

Your password was changed. If this was not you, contact support immediately.";

const EMAIL_ACCOUNT_APPROVAL: &str = "\
Hi {{userName}},

Your account has been approved. You can now take part in sales.";

pub struct EmailRenderer {
    registry: Handlebars<'static>,
}

impl EmailRenderer {
    pub fn new() -> Result<Self> {
        let mut registry = Handlebars::new();
        registry.set_strict_mode(false);

        let templates = [
            (routing_keys::RESERVATION_CREATED, RESERVATION_CREATED),
            (routing_keys::RESERVATION_CONFIRMED, RESERVATION_CONFIRMED),
            (routing_keys::RESERVATION_CANCELLED, RESERVATION_CANCELLED),
            (routing_keys::RESERVATION_EXPIRED, RESERVATION_EXPIRED),
            (routing_keys::EMAIL_VERIFICATION, EMAIL_VERIFICATION),
            (routing_keys::EMAIL_PASSWORD_RESET, EMAIL_PASSWORD_RESET),
            (routing_keys::EMAIL_PASSWORD_CHANGED, EMAIL_PASSWORD_CHANGED),
            (routing_keys::EMAIL_ACCOUNT_APPROVAL, EMAIL_ACCOUNT_APPROVAL),
        ];

        for (name, template) in templates {
            registry
                .register_template_string(name, template)
                .map_err(|e| Error::notification(format!("Bad template {}: {}", name, e)))?;
        }

        Ok(Self { registry })
    }

    pub fn has_template(&self, routing_key: &str) -> bool {
        self.registry.has_template(routing_key)
    }

    /// Render body for a routing key against the event data
    pub fn render(&self, routing_key: &str, data: &serde_json::Value) -> Result<String> {
        self.registry
            .render(routing_key, data)
            .map_err(|e| Error::notification(format!("Render failed for {}: {}", routing_key, e)))
    }

    /// Subject line per routing key
    pub fn subject(&self, routing_key: &str) -> &'static str {
        match routing_key {
            routing_keys::RESERVATION_CREATED => "Your reservation is held",
            routing_keys::RESERVATION_CONFIRMED => "Purchase confirmed",
            routing_keys::RESERVATION_CANCELLED => "Reservation cancelled",
            routing_keys::RESERVATION_EXPIRED => "Reservation expired",
            routing_keys::EMAIL_VERIFICATION => "Verify your email",
            routing_keys::EMAIL_PASSWORD_RESET => "Password reset",
            routing_keys::EMAIL_PASSWORD_CHANGED => "Password changed",
            routing_keys::EMAIL_ACCOUNT_APPROVAL => "Account approved",
            _ => "Notification",
        }
    }
}
