//! Rendering of feed items into emails.

use crate::feed::{FeedItem, NO_SUMMARY};

use super::types::OutgoingMail;

/// Closing line of every email.
pub const FOOTER: &str = "This email was sent by RSS to Email service.";

/// Shown in the text body when the item has no link.
const NO_LINK: &str = "No Link";

/// Tags that end a line when converting markup to text.
const LINE_BREAK_TAGS: &[&str] = &["br", "/p", "/div", "/li", "/h1", "/h2", "/h3", "/h4", "/tr"];

/// Render one item of the feed titled `feed_title` into an email.
pub fn format_item_email(feed_title: &str, item: &FeedItem) -> OutgoingMail {
    let subject = format!("[RSS] {}: {}", feed_title, item.title);

    let link = if item.link.is_empty() {
        NO_LINK
    } else {
        item.link.as_str()
    };
    let mut summary = strip_html(&item.summary);
    if summary.is_empty() {
        summary = NO_SUMMARY.to_string();
    }

    let text_body = format!(
        "New post from {feed}\n\n\
         Title: {title}\n\
         Link: {link}\n\
         Published: {published}\n\n\
         {summary}\n\n\
         ---\n\
         {FOOTER}\n",
        feed = feed_title,
        title = item.title,
        published = item.published_text,
    );

    OutgoingMail::new(subject, text_body).with_html(render_html(feed_title, item))
}

fn render_html(feed_title: &str, item: &FeedItem) -> String {
    let href = if item.link.is_empty() {
        "#".to_string()
    } else {
        html_escape::encode_double_quoted_attribute(&item.link).into_owned()
    };

    format!(
        r#"<html>
<body style="font-family: Arial, sans-serif; line-height: 1.6; color: #333;">
  <h2 style="color: #2c3e50;">New post from {feed}</h2>
  <div style="background-color: #f8f9fa; padding: 15px; border-left: 4px solid #3498db;">
    <h3 style="margin-top: 0;"><a href="{href}" style="color: #2980b9; text-decoration: none;">{title}</a></h3>
    <p style="color: #7f8c8d; font-size: 0.9em;"><strong>Published:</strong> {published}</p>
  </div>
  <div style="margin: 20px 0;">{summary}</div>
  <p style="color: #95a5a6; font-size: 0.85em; border-top: 1px solid #ecf0f1; padding-top: 20px;">{FOOTER}</p>
</body>
</html>
"#,
        feed = html_escape::encode_text(feed_title),
        title = html_escape::encode_text(&item.title),
        published = html_escape::encode_text(&item.published_text),
        summary = item.summary,
    )
}

/// Convert summary markup to plain text.
///
/// Tags are removed, entities decoded, whitespace collapsed within a line,
/// and block-level closers turned into line breaks.
pub fn strip_html(html: &str) -> String {
    let mut result = String::with_capacity(html.len());
    let mut text = String::new();
    let mut in_tag = false;
    let mut tag = String::new();

    for ch in html.chars() {
        match ch {
            '<' => {
                html_escape::decode_html_entities_to_string(&text, &mut result);
                text.clear();
                in_tag = true;
                tag.clear();
            }
            '>' if in_tag => {
                in_tag = false;
                if ends_line(&tag) {
                    result.push('\n');
                }
            }
            _ if in_tag => tag.push(ch),
            _ => text.push(ch),
        }
    }
    html_escape::decode_html_entities_to_string(&text, &mut result);

    let mut lines: Vec<String> = Vec::new();
    for line in result.lines() {
        let line = line.split_whitespace().collect::<Vec<_>>().join(" ");
        // Keep at most one blank line in a row
        if line.is_empty() && lines.last().map_or(true, |l| l.is_empty()) {
            continue;
        }
        lines.push(line);
    }
    while lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }

    lines.join("\n")
}

fn ends_line(tag: &str) -> bool {
    let name = tag
        .trim()
        .trim_end_matches('/')
        .split_whitespace()
        .next()
        .unwrap_or("")
        .to_ascii_lowercase();
    LINE_BREAK_TAGS.contains(&name.as_str())
}
