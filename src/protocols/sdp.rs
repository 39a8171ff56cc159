//! Message bodies and the small amount of SDP handling the core needs

use crate::{Error, Result};

/// Attribute line marking an offer that came from behind NAT
pub const NAT_MARKER: &str = "a=nated:yes";

const FILTERED_TRANSPORTS: [&str; 3] = ["udp", "udptl", "rtp/avp"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Body {
    pub content_type: String,
    pub content: String,
}

impl Body {
    pub fn new<T: Into<String>, C: Into<String>>(content_type: T, content: C) -> Self {
        Self {
            content_type: content_type.into(),
            content: content.into(),
        }
    }

    pub fn sdp<C: Into<String>>(content: C) -> Self {
        Self::new("application/sdp", content)
    }

    pub fn is_sdp(&self) -> bool {
        self.content_type.eq_ignore_ascii_case("application/sdp")
    }

    fn line_ending(&self) -> &'static str {
        if self.content.contains("\r\n") {
            "\r\n"
        } else {
            "\n"
        }
    }

    /// Append an attribute line to the end of the body
    pub fn append_line(&mut self, line: &str) {
        let eol = self.line_ending();
        if !self.content.is_empty() && !self.content.ends_with('\n') {
            self.content.push_str(eol);
        }
        self.content.push_str(line);
        self.content.push_str(eol);
    }

    pub fn mark_nated(&mut self) {
        self.append_line(NAT_MARKER);
    }

    /// Keep only `allowed` payload types on media sections using a
    /// filterable transport, dropping sections left without any format.
    /// Returns the number of media sections that remain.
    pub fn filter_payload_types(&mut self, allowed: &[u8]) -> Result<usize> {
        let eol = self.line_ending();
        let mut lines = self
            .content
            .split('\n')
            .map(|l| l.trim_end_matches('\r'))
            .filter(|l| !l.is_empty());

        let mut session = match lines.next() {
            Some(first) if first.starts_with("v=") => vec![first.to_string()],
            _ => return Err(Error::parse("SDP body does not start with a version line")),
        };
        let mut sections: Vec<Vec<String>> = Vec::new();
        for line in lines {
            if !line.contains('=') {
                return Err(Error::parse(format!("Malformed SDP line: {}", line)));
            }
            if line.starts_with("m=") {
                sections.push(vec![line.to_string()]);
            } else if let Some(section) = sections.last_mut() {
                section.push(line.to_string());
            } else {
                session.push(line.to_string());
            }
        }

        let mut kept = Vec::with_capacity(sections.len());
        for mut section in sections {
            let fields: Vec<&str> = section[0][2..].split_whitespace().collect();
            if fields.len() < 3 {
                return Err(Error::parse(format!("Malformed media line: {}", section[0])));
            }
            if !FILTERED_TRANSPORTS.contains(&fields[2].to_ascii_lowercase().as_str()) {
                kept.push(section);
                continue;
            }
            let formats: Vec<&str> = fields[3..]
                .iter()
                .copied()
                .filter(|f| f.parse::<u8>().map(|pt| allowed.contains(&pt)).unwrap_or(false))
                .collect();
            if formats.is_empty() {
                continue;
            }
            let mut media = format!("m={} {} {}", fields[0], fields[1], fields[2]);
            for format in &formats {
                media.push(' ');
                media.push_str(format);
            }
            section[0] = media;
            kept.push(section);
        }

        let remaining = kept.len();
        let mut content = session.join(eol);
        content.push_str(eol);
        for line in kept.into_iter().flatten() {
            content.push_str(&line);
            content.push_str(eol);
        }
        self.content = content;
        Ok(remaining)
    }
}
