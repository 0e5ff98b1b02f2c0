//! SMTP email alerts with the event image inline.

use anyhow::{anyhow, Context, Result};
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use std::path::Path;
use std::time::Duration;

use crate::config::EmailSettings;
use crate::store::EventRecord;

use super::Notifier;

const IMAGE_CONTENT_ID: &str = "detection_image";
const SMTP_TIMEOUT: Duration = Duration::from_secs(30);

pub struct EmailNotifier {
    from: Mailbox,
    recipients: Vec<Mailbox>,
    mailer: SmtpTransport,
}

impl EmailNotifier {
    /// Validate addresses and prepare a STARTTLS transport. Does not connect.
    pub fn new(settings: EmailSettings) -> Result<Self> {
        let from: Mailbox = settings
            .username
            .parse()
            .with_context(|| format!("sender '{}' is not an email address", settings.username))?;
        let recipients = settings
            .recipients
            .iter()
            .map(|r| {
                r.parse::<Mailbox>()
                    .with_context(|| format!("recipient '{}' is not an email address", r))
            })
            .collect::<Result<Vec<_>>>()?;
        if recipients.is_empty() {
            return Err(anyhow!("no email recipients configured"));
        }
        let mailer = SmtpTransport::starttls_relay(&settings.smtp_server)
            .with_context(|| format!("invalid SMTP server '{}'", settings.smtp_server))?
            .port(settings.smtp_port)
            .credentials(Credentials::new(settings.username, settings.password))
            .timeout(Some(SMTP_TIMEOUT))
            .build();
        Ok(Self {
            from,
            recipients,
            mailer,
        })
    }

    pub fn build_message(&self, record: &EventRecord) -> Result<Message> {
        let mut builder = Message::builder()
            .from(self.from.clone())
            .subject(subject(record));
        for to in &self.recipients {
            builder = builder.to(to.clone());
        }

        let mut body = MultiPart::related().singlepart(SinglePart::html(html_body(record)));
        let image_path = Path::new(&record.image_path);
        match std::fs::read(image_path) {
            Ok(bytes) => {
                let content_type = ContentType::parse("image/jpeg")
                    .map_err(|e| anyhow!("invalid content type: {}", e))?;
                body = body.singlepart(
                    Attachment::new_inline(IMAGE_CONTENT_ID.to_string()).body(bytes, content_type),
                );
            }
            Err(err) => log::warn!(
                "email for {} sent without image {}: {}",
                record.camera,
                image_path.display(),
                err
            ),
        }
        builder.multipart(body).context("build email message")
    }
}

impl Notifier for EmailNotifier {
    fn name(&self) -> &'static str {
        "email"
    }

    fn notify(&self, record: &EventRecord) -> Result<()> {
        let message = self.build_message(record)?;
        self.mailer.send(&message).context("SMTP delivery failed")?;
        log::info!(
            "sent email notification for {} detection on {}",
            record.detection_type,
            record.camera
        );
        Ok(())
    }
}

pub fn subject(record: &EventRecord) -> String {
    format!(
        "CCTV Alert: {} detected on {}",
        record.detection_type.display_name(),
        record.camera
    )
}

fn html_body(record: &EventRecord) -> String {
    format!(
        "<html>\n<body>\n\
         <h2>CCTV Intelligence System Alert</h2>\n\
         <p><strong>Camera:</strong> {camera}</p>\n\
         <p><strong>Detection:</strong> {detection}</p>\n\
         <p><strong>Time:</strong> {time}</p>\n\
         <p><strong>Objects Detected:</strong> {count}</p>\n\
         <div>\n<p>Detection Image:</p>\n\
         <img src=\"cid:{cid}\" style=\"max-width: 100%; height: auto;\" />\n</div>\n\
         <p><em>This is an automated notification from your CCTV Intelligence System.</em></p>\n\
         </body>\n</html>\n",
        camera = escape_html(&record.camera),
        detection = record.detection_type.display_name(),
        time = escape_html(&record.timestamp),
        count = record.objects.len(),
        cid = IMAGE_CONTENT_ID,
    )
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}
