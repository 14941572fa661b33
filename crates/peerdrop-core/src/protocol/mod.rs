//! PeerDrop wire protocol.
//!
//! Three kinds of message travel between peers:
//!
//! ## UDP datagrams
//!
//! ```text
//! DISCOVERY_REQUEST
//! DISCOVERY_RESPONSE|<name>|<ip>|<port>|<avatar>
//! HELLO|<name>|<ip>|<port>|<avatar>
//! BYE|<name>|<ip>|<port>|<avatar>
//! ```
//!
//! ## Transfer manifest
//!
//! ```text
//! FILE_COUNT:<n>|FILENAMES:<p1,p2,..>|SIZES:<s1,s2,..>|SENDER_NAME:<s>|SENDER_IP:<s>|SENDER_PORT:<n>|SENDER_AVATAR:<s>
//! ```
//!
//! ## TCP framing
//!
//! ```text
//! ┌──────────────────────┬──────────────────────────┐
//! │  Length (u32, BE)    │   UTF-8 text             │
//! │      4 bytes         │   (Length bytes)         │
//! └──────────────────────┴──────────────────────────┘
//! ```
//!
//! The manifest and the `ACCEPT_TRANSMISSION` / `DENY_TRANSMISSION` token are
//! each sent as one frame. After an accept token the raw file bytes follow
//! with no framing (see [`crate::compression`] for the compressed variant).

use std::fmt;

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::{Error, Result};
use crate::file::{ManifestEntry, TransferManifest};
use crate::peer::{PeerIdentity, UNKNOWN};

/// Broadcast by a discovery requester.
pub const DISCOVERY_REQUEST: &str = "DISCOVERY_REQUEST";

/// Prefix of a discovery answer.
pub const DISCOVERY_RESPONSE: &str = "DISCOVERY_RESPONSE";

/// Receiver agrees to the transfer.
pub const ACCEPT_TRANSMISSION: &str = "ACCEPT_TRANSMISSION";

/// Receiver refuses the transfer.
pub const DENY_TRANSMISSION: &str = "DENY_TRANSMISSION";

/// Largest manifest or token frame accepted (64 MiB).
pub const MAX_MANIFEST_SIZE: usize = 64 * 1024 * 1024;

const FIELD_SEP: char = '|';
const LIST_SEP: char = ',';

/// Presence announcement kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PresenceKind {
    /// Peer joined the network
    Hello,
    /// Peer is leaving the network
    Bye,
}

impl PresenceKind {
    /// Wire tag of this kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Hello => "HELLO",
            Self::Bye => "BYE",
        }
    }

    fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "HELLO" => Some(Self::Hello),
            "BYE" => Some(Self::Bye),
            _ => None,
        }
    }
}

impl fmt::Display for PresenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Encode a manifest as its key-value wire string.
///
/// # Errors
///
/// Returns `InvalidInput` if a relative path contains `|` or `,`, or a
/// sender field contains `|`, since the result could not be decoded back.
pub fn encode_manifest(manifest: &TransferManifest) -> Result<String> {
    for entry in &manifest.files {
        if entry.relative_path.contains([FIELD_SEP, LIST_SEP]) {
            return Err(Error::InvalidInput(format!(
                "file name '{}' contains a reserved character ('|' or ',')",
                entry.relative_path
            )));
        }
    }
    check_field("sender name", &manifest.sender.name)?;
    check_field("sender ip", &manifest.sender.ip)?;
    check_field("sender avatar", &manifest.sender.avatar)?;

    let names = manifest
        .files
        .iter()
        .map(|f| f.relative_path.as_str())
        .collect::<Vec<_>>()
        .join(",");
    let sizes = manifest
        .files
        .iter()
        .map(|f| f.size.to_string())
        .collect::<Vec<_>>()
        .join(",");

    Ok(format!(
        "FILE_COUNT:{}|FILENAMES:{names}|SIZES:{sizes}|SENDER_NAME:{}|SENDER_IP:{}|SENDER_PORT:{}|SENDER_AVATAR:{}",
        manifest.file_count(),
        manifest.sender.name,
        manifest.sender.ip,
        manifest.sender.port,
        manifest.sender.avatar,
    ))
}

/// Decode a manifest wire string.
///
/// Each `|`-separated field is split on its first `:`. Unknown keys are
/// ignored, a missing or unparseable count or port reads as 0, and missing
/// string fields read as `"unknown"`.
///
/// # Errors
///
/// Returns `ProtocolError` if a size is not a number, or if the number of
/// names, the number of sizes and `FILE_COUNT` disagree.
pub fn decode_manifest(text: &str) -> Result<TransferManifest> {
    let mut count = 0usize;
    let mut names: Vec<&str> = Vec::new();
    let mut sizes: Vec<u64> = Vec::new();
    let mut sender_name = None;
    let mut sender_ip = None;
    let mut sender_port = 0u16;
    let mut sender_avatar = None;

    for field in text.split(FIELD_SEP) {
        let Some((key, value)) = field.split_once(':') else {
            continue;
        };
        match key {
            "FILE_COUNT" => count = value.trim().parse().unwrap_or(0),
            "FILENAMES" => names = split_list(value).collect(),
            "SIZES" => {
                sizes = split_list(value)
                    .map(|s| {
                        s.trim().parse::<u64>().map_err(|_| {
                            Error::ProtocolError(format!("invalid file size '{s}'"))
                        })
                    })
                    .collect::<Result<_>>()?;
            }
            "SENDER_NAME" => sender_name = Some(value),
            "SENDER_IP" => sender_ip = Some(value),
            "SENDER_PORT" => sender_port = value.trim().parse().unwrap_or(0),
            "SENDER_AVATAR" => sender_avatar = Some(value),
            _ => {}
        }
    }

    if names.len() != sizes.len() || names.len() != count {
        return Err(Error::ProtocolError(format!(
            "manifest announces {count} files but lists {} names and {} sizes",
            names.len(),
            sizes.len()
        )));
    }

    let files = names
        .into_iter()
        .zip(sizes)
        .map(|(name, size)| ManifestEntry::new(name, size))
        .collect();

    let sender = PeerIdentity::new(
        sender_name.unwrap_or(UNKNOWN),
        sender_ip.unwrap_or(UNKNOWN),
        sender_port,
        sender_avatar.unwrap_or(UNKNOWN),
    );

    Ok(TransferManifest::new(files, sender))
}

/// Write a manifest as one length-prefixed frame.
///
/// # Errors
///
/// Returns an error if the manifest cannot be encoded or writing fails.
pub async fn write_manifest<W>(writer: &mut W, manifest: &TransferManifest) -> Result<()>
where
    W: AsyncWriteExt + Unpin,
{
    let text = encode_manifest(manifest)?;
    write_text_frame(writer, &text).await
}

/// Read one length-prefixed frame and decode it as a manifest.
///
/// # Errors
///
/// Returns an error if reading fails, the frame is oversized or not UTF-8,
/// or the manifest is malformed.
pub async fn read_manifest<R>(reader: &mut R) -> Result<TransferManifest>
where
    R: AsyncReadExt + Unpin,
{
    let text = read_text_frame(reader).await?;
    decode_manifest(&text)
}

/// Write the accept/deny token as one length-prefixed frame.
///
/// # Errors
///
/// Returns an error if writing fails.
pub async fn write_token<W>(writer: &mut W, token: &str) -> Result<()>
where
    W: AsyncWriteExt + Unpin,
{
    write_text_frame(writer, token).await
}

/// Read the accept/deny token.
///
/// # Errors
///
/// Returns an error if reading fails or the frame is invalid.
pub async fn read_token<R>(reader: &mut R) -> Result<String>
where
    R: AsyncReadExt + Unpin,
{
    read_text_frame(reader).await
}

/// Write `text` as `[u32 BE length][UTF-8 bytes]` and flush.
///
/// # Errors
///
/// Returns an error if the text exceeds [`MAX_MANIFEST_SIZE`] or writing fails.
pub async fn write_text_frame<W>(writer: &mut W, text: &str) -> Result<()>
where
    W: AsyncWriteExt + Unpin,
{
    let bytes = text.as_bytes();
    if bytes.len() > MAX_MANIFEST_SIZE {
        return Err(Error::InvalidInput(format!(
            "frame of {} bytes exceeds the {MAX_MANIFEST_SIZE} byte limit",
            bytes.len()
        )));
    }

    #[allow(clippy::cast_possible_truncation)]
    writer.write_all(&(bytes.len() as u32).to_be_bytes()).await?;
    writer.write_all(bytes).await?;
    writer.flush().await?;

    Ok(())
}

/// Read one `[u32 BE length][UTF-8 bytes]` frame.
///
/// The declared length is checked against [`MAX_MANIFEST_SIZE`] before any
/// allocation.
///
/// # Errors
///
/// Returns an error if reading fails, the length is too large, or the bytes
/// are not valid UTF-8.
pub async fn read_text_frame<R>(reader: &mut R) -> Result<String>
where
    R: AsyncReadExt + Unpin,
{
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf) as usize;

    if len > MAX_MANIFEST_SIZE {
        return Err(Error::ProtocolError(format!(
            "frame length {len} exceeds the {MAX_MANIFEST_SIZE} byte limit"
        )));
    }

    let mut payload = vec![0u8; len];
    if len > 0 {
        reader.read_exact(&mut payload).await?;
    }

    String::from_utf8(payload).map_err(|_| Error::ProtocolError("frame is not valid UTF-8".into()))
}

/// Encode a presence announcement.
///
/// # Errors
///
/// Returns `InvalidInput` if a field of `peer` contains `|`.
pub fn encode_presence(kind: PresenceKind, peer: &PeerIdentity) -> Result<Vec<u8>> {
    encode_peer_message(kind.as_str(), peer)
}

/// Decode a presence announcement.
///
/// Returns `None` for anything that is not a well-formed `HELLO` or `BYE`.
#[must_use]
pub fn decode_presence(data: &[u8]) -> Option<(PresenceKind, PeerIdentity)> {
    let (tag, peer) = decode_peer_message(data)?;
    Some((PresenceKind::from_tag(tag)?, peer))
}

/// Encode the answer to a discovery request.
///
/// # Errors
///
/// Returns `InvalidInput` if a field of `peer` contains `|`.
pub fn encode_discovery_response(peer: &PeerIdentity) -> Result<Vec<u8>> {
    encode_peer_message(DISCOVERY_RESPONSE, peer)
}

/// Decode the answer to a discovery request.
///
/// Returns `None` for malformed input, a wrong field count or a
/// non-numeric port.
#[must_use]
pub fn decode_discovery_response(data: &[u8]) -> Option<PeerIdentity> {
    match decode_peer_message(data)? {
        (DISCOVERY_RESPONSE, peer) => Some(peer),
        _ => None,
    }
}

/// Whether a datagram is a discovery request.
#[must_use]
pub fn is_discovery_request(data: &[u8]) -> bool {
    std::str::from_utf8(data).is_ok_and(|text| text.trim() == DISCOVERY_REQUEST)
}

fn encode_peer_message(tag: &str, peer: &PeerIdentity) -> Result<Vec<u8>> {
    check_field("peer name", &peer.name)?;
    check_field("peer ip", &peer.ip)?;
    check_field("peer avatar", &peer.avatar)?;
    Ok(format!(
        "{tag}|{}|{}|{}|{}",
        peer.name, peer.ip, peer.port, peer.avatar
    )
    .into_bytes())
}

fn decode_peer_message(data: &[u8]) -> Option<(&str, PeerIdentity)> {
    let text = std::str::from_utf8(data).ok()?;
    let mut parts = text.split(FIELD_SEP);
    let tag = parts.next()?;
    let name = parts.next()?;
    let ip = parts.next()?;
    let port = parts.next()?.trim().parse::<u16>().ok()?;
    let avatar = parts.next()?;
    if parts.next().is_some() {
        return None;
    }
    Some((tag, PeerIdentity::new(name, ip, port, avatar)))
}

fn split_list(value: &str) -> impl Iterator<Item = &str> {
    value.split(LIST_SEP).filter(|s| !s.is_empty())
}

fn check_field(what: &str, value: &str) -> Result<()> {
    if value.contains(FIELD_SEP) {
        return Err(Error::InvalidInput(format!("{what} '{value}' contains '|'")));
    }
    Ok(())
}
