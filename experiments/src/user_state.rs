use std::collections::HashMap;
use std::fmt::Write;

use crate::api::FeatureStatus;
use crate::experiment::ResolvedExperiments;

/// The persisted token packs a user's id, bucket, and per-domain state into
/// one string. The sentinel delimiters are non-ASCII on purpose: they cannot
/// collide with the embedded JSON payloads. Ids and stamps must not contain
/// them; that is a precondition of the format, not something handled here.
///
/// ```text
/// u:<id>«b:<bucket>╣app:«s:<stamp>«d:<json>║╣shared:«s:<stamp>«d:<json>║
/// ```
const FIELD_DELIM: char = '\u{ab}'; // «
const DOMAIN_DELIM: char = '\u{2563}'; // ╣
const DOMAIN_END: char = '\u{2551}'; // ║

/// One domain's slice of a user's persisted state: the configuration stamp
/// the client last saw, and its dirty feature overrides.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DomainUserState {
    pub stamp: String,
    pub dirty: HashMap<String, FeatureStatus>,
}

/// Per-request user state, decoded fresh from the token on every request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserState {
    pub id: Option<String>,
    pub bucket: Option<u32>,
    pub app: DomainUserState,
    pub shared: DomainUserState,
}

/// Outcome of decoding a persisted token. `Malformed` instructs the caller
/// to fall back to a default state and discard the stored token; the
/// recovery is the same no matter how the token broke, so no error detail
/// is carried.
#[derive(Debug, PartialEq)]
pub enum DecodeOutcome {
    State(UserState),
    Malformed,
}

/// Serializes a user's resolved experiments into a token. The bucket is
/// taken from the app domain, matching what `decode` hands back.
pub fn encode(
    id: &str,
    app: &ResolvedExperiments,
    shared: &ResolvedExperiments,
) -> Result<String, serde_json::Error> {
    let mut token = format!("u:{}{}b:{}", id, FIELD_DELIM, app.bucket);
    encode_domain(&mut token, "app", app)?;
    encode_domain(&mut token, "shared", shared)?;
    Ok(token)
}

fn encode_domain(
    token: &mut String,
    name: &str,
    resolved: &ResolvedExperiments,
) -> Result<(), serde_json::Error> {
    let dirty = serde_json::to_string(&resolved.dirty_features)?;
    let _ = write!(
        token,
        "{}{}:{}s:{}{}d:{}{}",
        DOMAIN_DELIM, name, FIELD_DELIM, resolved.stamp, FIELD_DELIM, dirty, DOMAIN_END
    );
    Ok(())
}

/// Decodes a token with a single forward pass. Any structural mismatch or
/// embedded JSON failure yields `Malformed`; this never panics on corrupt
/// input. Trailing bytes after the shared section are ignored.
pub fn decode(token: &str) -> DecodeOutcome {
    match parse(token) {
        Some(state) => DecodeOutcome::State(state),
        None => DecodeOutcome::Malformed,
    }
}

fn parse(token: &str) -> Option<UserState> {
    let mut scanner = Scanner::new(token);

    scanner.tag("u:")?;
    let id = scanner.until(FIELD_DELIM)?;
    scanner.tag("b:")?;
    let bucket = scanner.before(DOMAIN_DELIM)?.parse::<u32>().ok()?;

    let app = parse_domain(&mut scanner, "app")?;
    let shared = parse_domain(&mut scanner, "shared")?;

    Some(UserState {
        id: Some(id.to_string()),
        bucket: Some(bucket),
        app,
        shared,
    })
}

fn parse_domain(scanner: &mut Scanner, name: &str) -> Option<DomainUserState> {
    scanner.delim(DOMAIN_DELIM)?;
    scanner.tag(name)?;
    scanner.tag(":")?;
    scanner.delim(FIELD_DELIM)?;
    scanner.tag("s:")?;
    let stamp = scanner.until(FIELD_DELIM)?.to_string();
    scanner.tag("d:")?;
    let dirty = serde_json::from_str(scanner.until(DOMAIN_END)?).ok()?;

    Some(DomainUserState { stamp, dirty })
}

/// Minimal cursor over the token string. Every method returns `None` on a
/// mismatch so `parse` can bail with `?` at the first sign of corruption.
struct Scanner<'a> {
    rest: &'a str,
}

impl<'a> Scanner<'a> {
    fn new(token: &'a str) -> Self {
        Scanner { rest: token }
    }

    fn tag(&mut self, expected: &str) -> Option<()> {
        self.rest = self.rest.strip_prefix(expected)?;
        Some(())
    }

    fn delim(&mut self, expected: char) -> Option<()> {
        self.rest = self.rest.strip_prefix(expected)?;
        Some(())
    }

    /// Consumes up to and including `delim`, returning the text before it.
    fn until(&mut self, delim: char) -> Option<&'a str> {
        let index = self.rest.find(delim)?;
        let (taken, rest) = self.rest.split_at(index);
        self.rest = &rest[delim.len_utf8()..];
        Some(taken)
    }

    /// Like `until`, but leaves the delimiter in place.
    fn before(&mut self, delim: char) -> Option<&'a str> {
        let index = self.rest.find(delim)?;
        let (taken, rest) = self.rest.split_at(index);
        self.rest = rest;
        Some(taken)
    }
}
