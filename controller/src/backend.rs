use std::{
    io::Write,
    process::{Command, Stdio},
    thread,
    time::Duration,
};

use base64::{engine::general_purpose, Engine as _};
use quick_xml::{events::Event, Reader};
use reqwest::blocking::{Client, Response};
use room_common::{CommandSpec, MediaConfig};
use thiserror::Error;
use tracing::{debug, info, warn};

const APP_HEADERS: [(&str, &str); 5] = [
    ("pragma", "no-cache"),
    ("X-Radiko-App", "pc_ts"),
    ("X-Radiko-App-Version", "4.0.0"),
    ("X-Radiko-User", "test-stream"),
    ("X-Radiko-Device", "pc"),
];

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("failed to build http client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{step} answered with status {status}")]
    Status { step: &'static str, status: u16 },
    #[error("{step} response has no `{header}` header")]
    MissingHeader {
        step: &'static str,
        header: &'static str,
    },
    #[error("invalid {what}: `{value}`")]
    Invalid { what: &'static str, value: String },
    #[error("key extraction failed: {0}")]
    KeyExtractor(String),
    #[error("malformed xml: {0}")]
    Xml(String),
    #[error("no stream listed for channel `{0}`")]
    NoStream(String),
}

/// Result of a successful handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub token: String,
    pub player_url: String,
    /// Channel ids. Index 0 is always the empty "off" entry.
    pub channels: Vec<String>,
}

impl Session {
    pub fn new(token: String, player_url: String, ids: Vec<String>) -> Self {
        let channels = std::iter::once(String::new()).chain(ids).collect();
        Self {
            token,
            player_url,
            channels,
        }
    }
}

pub trait StreamBackend: Send {
    fn authenticate(&mut self) -> Result<Session, BackendError>;
    fn resolve_stream(&mut self, channel: &str) -> Result<String, BackendError>;
}

/// Radiko-style handshake: player download, two auth steps keyed by a slice
/// of the player binary, then the station list for the detected area.
pub struct RadikoBackend {
    config: MediaConfig,
    client: Client,
}

impl RadikoBackend {
    /// Must be called off the async runtime; the blocking client owns its
    /// own runtime.
    pub fn new(config: MediaConfig) -> Result<Self, BackendError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(BackendError::Client)?;
        Ok(Self { config, client })
    }

    fn get(&self, step: &'static str, url: &str) -> Result<Response, BackendError> {
        let response = self.client.get(url).send().map_err(|source| BackendError::Http {
            url: url.to_string(),
            source,
        })?;
        check_status(step, response)
    }

    fn post_auth(
        &self,
        step: &'static str,
        url: &str,
        extra: &[(&str, &str)],
    ) -> Result<Response, BackendError> {
        let mut request = self.client.post(url).body("\r\n");
        for (name, value) in APP_HEADERS.iter().chain(extra.iter()) {
            request = request.header(*name, *value);
        }
        let response = request.send().map_err(|source| BackendError::Http {
            url: url.to_string(),
            source,
        })?;
        check_status(step, response)
    }
}

impl StreamBackend for RadikoBackend {
    fn authenticate(&mut self) -> Result<Session, BackendError> {
        let player = self.get("player download", &self.config.player_url)?;
        let player_url = player.url().to_string();
        let player_bytes = player
            .bytes()
            .map_err(|source| BackendError::Http {
                url: player_url.clone(),
                source,
            })?
            .to_vec();

        let auth1 = self.post_auth("auth1", &self.config.auth1_url, &[])?;
        let token = header(&auth1, "auth1", "x-radiko-authtoken")?;
        let offset = parse_usize("key offset", &header(&auth1, "auth1", "x-radiko-keyoffset")?)?;
        let length = parse_usize("key length", &header(&auth1, "auth1", "x-radiko-keylength")?)?;

        let key_blob = extract_key_blob(&self.config.key_extractor, player_bytes)?;
        let partial_key = partial_key(&key_blob, offset, length)?;

        let auth2 = self.post_auth(
            "auth2",
            &self.config.auth2_url,
            &[
                ("X-Radiko-Authtoken", token.as_str()),
                ("X-Radiko-Partialkey", partial_key.as_str()),
            ],
        )?;
        let body = auth2.text().map_err(|source| BackendError::Http {
            url: self.config.auth2_url.clone(),
            source,
        })?;
        let area = area_id(&body)?;
        debug!(area = %area, "auth2 accepted");

        let list_url = self.config.station_list_url.replace("{area}", &area);
        let stations = self
            .get("station list", &list_url)?
            .text()
            .map_err(|source| BackendError::Http {
                url: list_url.clone(),
                source,
            })?;
        let ids = parse_station_ids(&stations)?;
        info!(area = %area, stations = ids.len(), "backend session established");

        Ok(Session::new(token, player_url, ids))
    }

    fn resolve_stream(&mut self, channel: &str) -> Result<String, BackendError> {
        let url = self.config.stream_lookup_url.replace("{channel}", channel);
        let body = self
            .get("stream lookup", &url)?
            .text()
            .map_err(|source| BackendError::Http {
                url: url.clone(),
                source,
            })?;
        parse_first_item(&body)?.ok_or_else(|| BackendError::NoStream(channel.to_string()))
    }
}

fn check_status(step: &'static str, response: Response) -> Result<Response, BackendError> {
    let status = response.status();
    if !status.is_success() {
        return Err(BackendError::Status {
            step,
            status: status.as_u16(),
        });
    }
    Ok(response)
}

fn header(
    response: &Response,
    step: &'static str,
    name: &'static str,
) -> Result<String, BackendError> {
    response
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_string())
        .ok_or(BackendError::MissingHeader { step, header: name })
}

fn parse_usize(what: &'static str, value: &str) -> Result<usize, BackendError> {
    value.trim().parse().map_err(|_| BackendError::Invalid {
        what,
        value: value.to_string(),
    })
}

/// Feeds the player binary to the extractor and returns its stdout.
fn extract_key_blob(spec: &CommandSpec, player: Vec<u8>) -> Result<Vec<u8>, BackendError> {
    let mut child = Command::new(&spec.program)
        .args(&spec.args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|err| BackendError::KeyExtractor(format!("{}: {err}", spec.program)))?;

    // Writing from a second thread keeps a full stdout pipe from stalling us.
    let stdin = child.stdin.take();
    let writer = thread::Builder::new()
        .name("key-extract-in".to_string())
        .spawn(move || {
            if let Some(mut stdin) = stdin {
                let _ = stdin.write_all(&player);
            }
        })
        .map_err(|err| BackendError::KeyExtractor(err.to_string()))?;

    let output = child
        .wait_with_output()
        .map_err(|err| BackendError::KeyExtractor(err.to_string()))?;
    let _ = writer.join();

    for line in String::from_utf8_lossy(&output.stderr).lines() {
        if !line.trim().is_empty() {
            warn!(program = %spec.program, "{line}");
        }
    }
    if !output.status.success() {
        return Err(BackendError::KeyExtractor(format!(
            "{} exited with {}",
            spec.program, output.status
        )));
    }
    Ok(output.stdout)
}

pub(crate) fn partial_key(blob: &[u8], offset: usize, length: usize) -> Result<String, BackendError> {
    let slice = offset
        .checked_add(length)
        .and_then(|end| blob.get(offset..end))
        .ok_or_else(|| BackendError::Invalid {
            what: "key range",
            value: format!("{offset}+{length} of {} bytes", blob.len()),
        })?;
    Ok(general_purpose::STANDARD.encode(slice))
}

pub(crate) fn area_id(body: &str) -> Result<String, BackendError> {
    let area = body
        .trim()
        .split(',')
        .next()
        .unwrap_or_default()
        .trim()
        .to_string();
    if area.is_empty() {
        return Err(BackendError::Invalid {
            what: "auth2 body",
            value: body.to_string(),
        });
    }
    Ok(area)
}

/// Ids of `station` elements under the root's `stations` element.
pub(crate) fn parse_station_ids(xml: &str) -> Result<Vec<String>, BackendError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);
    let mut buf = Vec::new();
    let mut path: Vec<Vec<u8>> = Vec::new();
    let mut ids = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                if is_station(&path, e.name().as_ref()) {
                    ids.extend(attribute(&e, b"id"));
                }
                path.push(e.name().as_ref().to_vec());
            }
            Ok(Event::Empty(e)) => {
                if is_station(&path, e.name().as_ref()) {
                    ids.extend(attribute(&e, b"id"));
                }
            }
            Ok(Event::End(_)) => {
                path.pop();
            }
            Ok(Event::Eof) => break,
            Err(err) => return Err(BackendError::Xml(err.to_string())),
            _ => {}
        }
        buf.clear();
    }

    Ok(ids)
}

fn is_station(path: &[Vec<u8>], name: &[u8]) -> bool {
    path.len() == 2 && path[1] == b"stations" && name == b"station"
}

fn attribute(e: &quick_xml::events::BytesStart<'_>, key: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.as_ref() == key)
        .and_then(|a| a.unescape_value().ok().map(|v| v.trim().to_string()))
        .filter(|v| !v.is_empty())
}

/// Text of the first `item` directly under the root element.
pub(crate) fn parse_first_item(xml: &str) -> Result<Option<String>, BackendError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);
    let mut buf = Vec::new();
    let mut depth = 0usize;
    let mut text: Option<String> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                if depth == 1 && e.name().as_ref() == b"item" {
                    text = Some(String::new());
                }
                depth += 1;
            }
            Ok(Event::Text(t)) => {
                if let Some(content) = text.as_mut() {
                    content.push_str(&t.unescape().unwrap_or_default());
                }
            }
            Ok(Event::End(_)) => {
                depth = depth.saturating_sub(1);
                if let Some(content) = text.take() {
                    if depth == 1 {
                        let content = content.trim().to_string();
                        return Ok((!content.is_empty()).then_some(content));
                    }
                    text = Some(content);
                }
            }
            Ok(Event::Eof) => return Ok(None),
            Err(err) => return Err(BackendError::Xml(err.to_string())),
            _ => {}
        }
        buf.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const STATIONS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<radiko>
  <ttl>1800</ttl>
  <stations>
    <station id="TBS"><name>TBS Radio</name></station>
    <station id="QRR"><name>Nippon Cultural Broadcasting</name></station>
    <station><name>no id</name></station>
    <station id="LFR"/>
  </stations>
  <extra><stations><station id="NOPE"/></stations></extra>
</radiko>"#;

    #[test]
    fn collects_station_ids_in_order() {
        assert_eq!(parse_station_ids(STATIONS).unwrap(), vec!["TBS", "QRR", "LFR"]);
    }

    #[test]
    fn first_item_is_the_stream() {
        let xml = r#"<url><item areafree="0">rtmpe://f-radiko.smartstream.ne.jp/TBS/_definst_/simul-stream.stream</item><item>rtmp://other/app/x</item></url>"#;

        assert_eq!(
            parse_first_item(xml).unwrap().as_deref(),
            Some("rtmpe://f-radiko.smartstream.ne.jp/TBS/_definst_/simul-stream.stream")
        );
        assert_eq!(parse_first_item("<url></url>").unwrap(), None);
    }

    #[test]
    fn broken_xml_is_an_error() {
        assert!(matches!(
            parse_station_ids("<radiko><stations></radiko>"),
            Err(BackendError::Xml(_))
        ));
    }

    #[test]
    fn partial_key_slices_and_encodes() {
        let blob: Vec<u8> = (0u8..32).collect();

        assert_eq!(partial_key(&blob, 4, 3).unwrap(), general_purpose::STANDARD.encode([4u8, 5, 6]));
        assert!(partial_key(&blob, 30, 8).is_err());
        assert!(partial_key(&blob, usize::MAX, 2).is_err());
    }

    #[test]
    fn area_is_first_csv_field() {
        assert_eq!(area_id("JP13,tokyo Japan\r\n").unwrap(), "JP13");
        assert!(area_id("\r\n").is_err());
    }

    #[test]
    fn session_reserves_off_channel() {
        let session = Session::new("t".into(), "p".into(), vec!["TBS".into()]);

        assert_eq!(session.channels, vec!["".to_string(), "TBS".to_string()]);
    }

    #[test]
    fn extractor_receives_player_on_stdin() {
        let spec = CommandSpec::new("cat", &[]);
        let player = vec![7u8; 200_000];

        let out = extract_key_blob(&spec, player.clone()).unwrap();

        assert_eq!(out, player);
    }
}
