use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use mailparse::{MailHeaderMap, ParsedMail};
use native_tls::TlsConnector;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::app::error::AppError;

pub const SECURITY_SENDER: &str = "security@mail.instagram.com";
pub const VERIFY_SUBJECT: &str = "Verify your account";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeRequest {
    pub email: String,
    pub password: String,
    /// Defaults to the host derived from the email domain.
    pub host: Option<String>,
    pub port: u16,
    pub timeout: Duration,
}

impl CodeRequest {
    pub fn host(&self) -> String {
        self.host
            .clone()
            .filter(|host| !host.trim().is_empty())
            .unwrap_or_else(|| imap_host_for(&self.email))
    }
}

pub trait CodeRetriever: Send + Sync {
    /// `Ok(None)` when no matching message holds a code yet.
    fn get_code(&self, request: &CodeRequest) -> Result<Option<String>, AppError>;
}

pub fn imap_host_for(email: &str) -> String {
    let domain = email
        .rsplit_once('@')
        .map(|(_, domain)| domain.trim().to_ascii_lowercase())
        .unwrap_or_default();
    match domain.as_str() {
        "gmail.com" | "googlemail.com" => "imap.gmail.com".to_string(),
        "outlook.com" | "hotmail.com" | "live.com" | "msn.com" => "outlook.office365.com".to_string(),
        "yahoo.com" => "imap.mail.yahoo.com".to_string(),
        "icloud.com" | "me.com" => "imap.mail.me.com".to_string(),
        "" => "localhost".to_string(),
        other => format!("imap.{other}"),
    }
}

fn strip_html(html: &str) -> String {
    let without_tags = Regex::new(r"(?s)<[^>]*>")
        .map(|re| re.replace_all(html, " ").into_owned())
        .unwrap_or_else(|_| html.to_string());
    without_tags
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// The six digits following "code to confirm your identity", if present.
pub fn extract_code(text: &str) -> Option<String> {
    let re = Regex::new(r"(?is)code to confirm your identity\D{0,200}?(\d{6})\b").ok()?;
    re.captures(&strip_html(text))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

fn collect_bodies(part: &ParsedMail<'_>, out: &mut Vec<String>) {
    if part.subparts.is_empty() {
        let mimetype = part.ctype.mimetype.to_ascii_lowercase();
        if mimetype.starts_with("text/") {
            if let Ok(body) = part.get_body() {
                out.push(body);
            }
        }
        return;
    }
    for sub in &part.subparts {
        collect_bodies(sub, out);
    }
}

/// Strict sender and subject match, then a code from the HTML or text body.
pub fn code_from_message(raw: &[u8]) -> Option<String> {
    let parsed = mailparse::parse_mail(raw).ok()?;
    let from = parsed.headers.get_first_value("From").unwrap_or_default();
    let subject = parsed.headers.get_first_value("Subject").unwrap_or_default();
    if !from.to_ascii_lowercase().contains(SECURITY_SENDER) || !subject.contains(VERIFY_SUBJECT) {
        return None;
    }
    let mut bodies = Vec::new();
    collect_bodies(&parsed, &mut bodies);
    bodies.iter().find_map(|body| extract_code(body))
}

type ImapSession = imap::Session<native_tls::TlsStream<TcpStream>>;

pub struct ImapCodeRetriever {
    trace_id: String,
}

impl ImapCodeRetriever {
    pub fn new(trace_id: &str) -> Self {
        Self {
            trace_id: trace_id.to_string(),
        }
    }

    fn connect(&self, request: &CodeRequest) -> Result<ImapSession, AppError> {
        let host = request.host();
        let dependency = |what: &str, err: &dyn std::fmt::Display| {
            AppError::dependency(format!("IMAP {what} failed for {host}: {err}"), &self.trace_id)
        };
        let addr = (host.as_str(), request.port)
            .to_socket_addrs()
            .map_err(|err| dependency("resolve", &err))?
            .next()
            .ok_or_else(|| AppError::dependency(format!("IMAP host {host} did not resolve"), &self.trace_id))?;
        let stream = TcpStream::connect_timeout(&addr, request.timeout).map_err(|err| dependency("connect", &err))?;
        stream
            .set_read_timeout(Some(request.timeout))
            .and_then(|_| stream.set_write_timeout(Some(request.timeout)))
            .map_err(|err| dependency("socket setup", &err))?;
        let tls = TlsConnector::builder().build().map_err(|err| dependency("TLS setup", &err))?;
        let tls_stream = tls.connect(&host, stream).map_err(|err| dependency("TLS handshake", &err))?;
        let mut client = imap::Client::new(tls_stream);
        client.read_greeting().map_err(|err| dependency("greeting", &err))?;
        client
            .login(&request.email, &request.password)
            .map_err(|(err, _)| dependency("login", &err))
    }

    fn scan_folder(&self, session: &mut ImapSession, folder: &str) -> Option<String> {
        if let Err(err) = session.select(folder) {
            debug!(trace_id = %self.trace_id, folder = %folder, error = %err, "skipping folder");
            return None;
        }
        let query = format!("FROM \"{SECURITY_SENDER}\" SUBJECT \"{VERIFY_SUBJECT}\"");
        let mut ids: Vec<u32> = match session.search(&query) {
            Ok(ids) => ids.into_iter().collect(),
            Err(err) => {
                debug!(trace_id = %self.trace_id, folder = %folder, error = %err, "search failed");
                return None;
            }
        };
        ids.sort_unstable_by(|a, b| b.cmp(a));
        for id in ids {
            let messages = match session.fetch(id.to_string(), "RFC822") {
                Ok(messages) => messages,
                Err(err) => {
                    debug!(trace_id = %self.trace_id, folder = %folder, id, error = %err, "fetch failed");
                    continue;
                }
            };
            if let Some(code) = messages.iter().filter_map(|m| m.body()).find_map(code_from_message) {
                info!(trace_id = %self.trace_id, folder = %folder, "verification code found");
                return Some(code);
            }
        }
        None
    }
}

impl CodeRetriever for ImapCodeRetriever {
    fn get_code(&self, request: &CodeRequest) -> Result<Option<String>, AppError> {
        let mut session = self.connect(request)?;
        let folders: Vec<String> = match session.list(None, Some("*")) {
            Ok(names) => names.iter().map(|name| name.name().to_string()).collect(),
            Err(err) => {
                warn!(trace_id = %self.trace_id, error = %err, "⚠️ folder listing failed, scanning INBOX only");
                vec!["INBOX".to_string()]
            }
        };
        let mut found = None;
        for folder in &folders {
            if let Some(code) = self.scan_folder(&mut session, folder) {
                found = Some(code);
                break;
            }
        }
        let _ = session.logout();
        if found.is_none() {
            debug!(trace_id = %self.trace_id, folders = folders.len(), "no verification code yet");
        }
        Ok(found)
    }
}
