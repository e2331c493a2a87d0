//! TwiML rendering for telephony instructions.
//!
//! The provider consumes an XML document of verbs; this module turns a
//! [`TelephonyInstruction`] into that document. Artifact references become
//! absolute `/audio/{id}` URLs on the public host, and `Record` posts the
//! caller's speech back to the voice webhook.

use ringline_types::{TelephonyAction, TelephonyInstruction};

/// Renders instructions against a fixed public host.
#[derive(Debug, Clone)]
pub struct TwimlRenderer {
    public_url: String,
    record_max_seconds: u32,
}

impl TwimlRenderer {
    pub fn new(public_url: impl Into<String>, record_max_seconds: u32) -> Self {
        let mut public_url = public_url.into();
        while public_url.ends_with('/') {
            public_url.pop();
        }
        Self {
            public_url,
            record_max_seconds,
        }
    }

    /// Renders one instruction as a complete TwiML document.
    pub fn render(&self, instruction: &TelephonyInstruction) -> String {
        let mut xml = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<Response>");
        for action in &instruction.actions {
            match action {
                TelephonyAction::Say { text } => {
                    xml.push_str("<Say voice=\"alice\" language=\"en-US\">");
                    xml.push_str(&escape_xml(text));
                    xml.push_str("</Say>");
                }
                TelephonyAction::Play { artifact_id } => {
                    xml.push_str("<Play>");
                    xml.push_str(&escape_xml(&format!(
                        "{}/audio/{}",
                        self.public_url, artifact_id
                    )));
                    xml.push_str("</Play>");
                }
                TelephonyAction::Record => {
                    xml.push_str(&format!(
                        "<Record action=\"{}/api/telephony/voice\" method=\"POST\" \
                         maxLength=\"{}\" playBeep=\"true\" trim=\"trim-silence\"/>",
                        escape_xml(&self.public_url),
                        self.record_max_seconds
                    ));
                }
                TelephonyAction::Hangup => {
                    xml.push_str("<Hangup/>");
                }
            }
        }
        xml.push_str("</Response>");
        xml
    }

    /// A minimal spoken-error document for requests that cannot be mapped
    /// to any call session.
    pub fn render_error(&self, text: &str) -> String {
        self.render(&TelephonyInstruction::say_and_hangup(text))
    }
}

fn escape_xml(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            other => escaped.push(other),
        }
    }
    escaped
}
