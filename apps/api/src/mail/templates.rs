use super::Email;

const SIGNATURE: &str = "<p>Best regards,<br/>The Hireflow Team</p>";

/// Escapes text interpolated into HTML bodies.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

pub fn otp(to: &str, code: &str, ttl_minutes: u64) -> Email {
    let html = format!(
        r#"<!DOCTYPE html>
<html>
<body style="font-family: Arial, sans-serif; line-height: 1.6; color: #333;">
  <div style="max-width: 600px; margin: 0 auto; padding: 20px;">
    <h2>Verify Your Email</h2>
    <p>Use the following code to verify your email address:</p>
    <div style="font-size: 32px; font-weight: bold; color: #2563eb; text-align: center; letter-spacing: 5px; margin: 20px 0;">{code}</div>
    <p>This code expires in {ttl_minutes} minutes.</p>
    <p>If you didn't request this code, please ignore this email.</p>
  </div>
</body>
</html>"#,
        code = escape_html(code),
    );
    Email {
        to: to.to_string(),
        subject: "Hireflow - Verify Your Email".to_string(),
        html,
    }
}

pub fn cv_processed(to: &str, name: &str, link: &str) -> Email {
    let html = format!(
        "<h2>Hi {name},</h2>\n\
         <p>Your CV has been successfully parsed and your profile has been updated.</p>\n\
         <p><a href=\"{link}\">View your CV</a></p>\n\
         {SIGNATURE}",
        name = escape_html(name),
        link = escape_html(link),
    );
    Email {
        to: to.to_string(),
        subject: "Your CV has been processed".to_string(),
        html,
    }
}

pub fn task_completed(to: &str, label: &str, link: &str) -> Email {
    let html = format!(
        "<h2>Good news!</h2>\n\
         <p>Your {label} task has been completed.</p>\n\
         <p><a href=\"{link}\">View result</a></p>\n\
         {SIGNATURE}",
        label = escape_html(label),
        link = escape_html(link),
    );
    Email {
        to: to.to_string(),
        subject: format!("Your {label} is ready"),
        html,
    }
}
