//! Canonical serialization, ids, and signatures for archive events.
//!
//! The id of an event is the SHA-256 of the NIP-01 array
//! `[0, pubkey, created_at, kind, tags, content]` written as compact JSON.
//! Field order is fixed and JSON string escaping delimits every value, so two
//! events built from the same inputs always hash to the same id no matter
//! which client or relay produced them.

use secp256k1::{schnorr::Signature, Message, Secp256k1, XOnlyPublicKey};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::{
    error::{SigningError, VerificationFailure},
    event::{Event, Tag, UnsignedEvent, ARCHIVE_KIND},
    identity::Keys,
};

/// Compact JSON bytes hashed to produce an event id.
pub fn canonical_bytes(
    pubkey: &str,
    created_at: u64,
    kind: u32,
    tags: &[Tag],
    content: &str,
) -> serde_json::Result<Vec<u8>> {
    let arr = serde_json::json!([0, pubkey, created_at, kind, tags, content]);
    serde_json::to_vec(&arr)
}

/// Recompute the event hash from its fields.
pub fn event_hash(ev: &Event) -> serde_json::Result<[u8; 32]> {
    hash_fields(&ev.pubkey, ev.created_at, ev.kind, &ev.tags, &ev.content)
}

fn hash_fields(
    pubkey: &str,
    created_at: u64,
    kind: u32,
    tags: &[Tag],
    content: &str,
) -> serde_json::Result<[u8; 32]> {
    let data = canonical_bytes(pubkey, created_at, kind, tags, content)?;
    Ok(Sha256::digest(&data).into())
}

/// Assemble an unsigned archive event for `source_url`.
pub fn build(source_url: &str, body: &str, author: &str, now: u64) -> UnsignedEvent {
    UnsignedEvent {
        pubkey: author.to_string(),
        kind: ARCHIVE_KIND,
        created_at: now,
        tags: vec![Tag::reference(source_url)],
        content: body.to_string(),
    }
}

/// Attach the id and a Schnorr signature, producing the final event.
pub fn sign(unsigned: UnsignedEvent, keys: &Keys) -> Result<Event, SigningError> {
    if unsigned.pubkey != keys.public_key_hex() {
        return Err(SigningError::KeyMismatch {
            event: unsigned.pubkey,
            key: keys.public_key_hex().to_string(),
        });
    }
    let hash = hash_fields(
        &unsigned.pubkey,
        unsigned.created_at,
        unsigned.kind,
        &unsigned.tags,
        &unsigned.content,
    )
    .map_err(|e| SigningError::Encoding(e.to_string()))?;
    let sig = keys.sign_digest(hash);
    Ok(Event {
        id: hex::encode(hash),
        pubkey: unsigned.pubkey,
        kind: unsigned.kind,
        created_at: unsigned.created_at,
        tags: unsigned.tags,
        content: unsigned.content,
        sig: hex::encode(sig.as_ref()),
    })
}

/// Whether the id matches the contents and the signature verifies.
pub fn verify(ev: &Event) -> bool {
    check(ev).is_ok()
}

/// Verify an event's id and Schnorr signature, naming the first failure.
pub fn check(ev: &Event) -> Result<(), VerificationFailure> {
    let hash = event_hash(ev).map_err(|_| VerificationFailure::MalformedField("tags"))?;
    if hex::encode(hash) != ev.id {
        return Err(VerificationFailure::IdMismatch);
    }
    let sig_bytes = hex::decode(&ev.sig).map_err(|_| VerificationFailure::MalformedField("sig"))?;
    let sig =
        Signature::from_slice(&sig_bytes).map_err(|_| VerificationFailure::MalformedField("sig"))?;
    let pk_bytes =
        hex::decode(&ev.pubkey).map_err(|_| VerificationFailure::MalformedField("pubkey"))?;
    let pk = XOnlyPublicKey::from_slice(&pk_bytes)
        .map_err(|_| VerificationFailure::MalformedField("pubkey"))?;
    let secp = Secp256k1::verification_only();
    secp.verify_schnorr(&sig, &Message::from_digest(hash), &pk)
        .map_err(|_| VerificationFailure::BadSignature)
}

/// Validate the shape of relay-supplied JSON and build an [`Event`] from it.
///
/// Checks types and hex lengths only; integrity is left to [`check`].
pub fn parse_untrusted(val: &Value) -> Result<Event, VerificationFailure> {
    use VerificationFailure::MalformedField;

    let obj = val.as_object().ok_or(MalformedField("event"))?;
    let id = hex_field(obj.get("id"), 64).ok_or(MalformedField("id"))?;
    let pubkey = hex_field(obj.get("pubkey"), 64).ok_or(MalformedField("pubkey"))?;
    let sig = hex_field(obj.get("sig"), 128).ok_or(MalformedField("sig"))?;
    let kind = obj
        .get("kind")
        .and_then(Value::as_u64)
        .and_then(|k| u32::try_from(k).ok())
        .ok_or(MalformedField("kind"))?;
    let created_at = obj
        .get("created_at")
        .and_then(Value::as_u64)
        .ok_or(MalformedField("created_at"))?;
    let content = obj
        .get("content")
        .and_then(Value::as_str)
        .ok_or(MalformedField("content"))?
        .to_string();
    let tags = obj
        .get("tags")
        .and_then(Value::as_array)
        .ok_or(MalformedField("tags"))?
        .iter()
        .map(|tag| {
            tag.as_array()
                .and_then(|fields| {
                    fields
                        .iter()
                        .map(|f| f.as_str().map(str::to_string))
                        .collect::<Option<Vec<_>>>()
                })
                .map(Tag)
        })
        .collect::<Option<Vec<_>>>()
        .ok_or(MalformedField("tags"))?;
    Ok(Event {
        id,
        pubkey,
        kind,
        created_at,
        tags,
        content,
        sig,
    })
}

fn hex_field(val: Option<&Value>, len: usize) -> Option<String> {
    let s = val?.as_str()?;
    let ok = s.len() == len && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
    ok.then(|| s.to_string())
}
