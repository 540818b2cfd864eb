//! Message envelope and its binary codec.
//!
//! A [`Message`] is the unit exchanged between the build tool and the
//! observer. Its frame payload is laid out as:
//! ```text
//! ┌────────────┬───────────┬───────────┬───────────┬───────────────┐
//! │ Session id │ Thread id │ Kind tag  │ Count     │ (Key, Value)* │
//! │ string     │ 8 bytes   │ string    │ 4 bytes   │ string pairs  │
//! │            │ int64 BE  │           │ int32 BE  │               │
//! └────────────┴───────────┴───────────┴───────────┴───────────────┘
//! ```
//! Strings use the length-prefixed encoding from [`crate::protocol`]; the
//! property pairs follow in the iteration order of the bag at encode time.
//!
//! The concrete shape of a message is selected by its [`MessageKind`] tag.
//! Kind-specific fields are not serialized separately; they are recovered by
//! reading named keys back out of the generic property bag. Unknown tags
//! decode as [`MessageKind::Generic`] so a consumer built against an older
//! tag set never crashes on messages introduced by a newer peer.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use bytes::{BufMut, Bytes, BytesMut};

use crate::connection::WorkerId;
use crate::error::{BuildwireError, Result};
use crate::protocol::{put_string, DecodeError, Reader};

/// Property bag of a message. Values may be null on the wire, which is
/// distinct from an empty string.
pub type Properties = BTreeMap<String, Option<String>>;

/// Property key holding the session start/end flag.
pub const SESSION_START: &str = "sessionStart";
/// Property key holding the execution root directory of a session.
pub const SESSION_EXECUTION_ROOT_DIRECTORY: &str = "sessionExecutionRootDirectory";
/// Property key holding the path of a refresh notification.
pub const REFRESH_PATH: &str = "path";

/// Leading field of a per-project property key.
const PROJECT_KEY_MARKER: &str = "p";
/// Number of tab-separated fields in a per-project property key.
const PROJECT_KEY_FIELDS: usize = 5;

/// Discriminator selecting a message's concrete shape.
///
/// The set is closed; adding a kind means extending the tag table below and
/// every exhaustive match over it. Application-defined extensions travel as
/// [`MessageKind::Generic`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Untyped key/value bag, also the fallback for unknown wire tags.
    Generic,
    /// Session start or end notification.
    Session,
    /// One-shot notification carrying every project after projects are read.
    ProjectsRead,
    /// Incremental mid-build notification about changed projects.
    Projects,
    /// Notification that a single path should be refreshed.
    Refresh,
}

/// Lookup table mapping kinds to their wire tags.
const KIND_TAGS: &[(MessageKind, &str)] = &[
    (MessageKind::Generic, "Message"),
    (MessageKind::Session, "SessionMessage"),
    (MessageKind::ProjectsRead, "ProjectsReadMessage"),
    (MessageKind::Projects, "ProjectsMessage"),
    (MessageKind::Refresh, "RefreshMessage"),
];

impl MessageKind {
    /// Wire tag naming this kind.
    pub fn tag(self) -> &'static str {
        match KIND_TAGS.iter().find(|(kind, _)| *kind == self) {
            Some((_, tag)) => tag,
            None => "Message",
        }
    }

    /// Resolve a wire tag, `None` for tags introduced by a newer peer.
    pub fn from_tag(tag: &str) -> Option<Self> {
        KIND_TAGS
            .iter()
            .find(|(_, candidate)| *candidate == tag)
            .map(|(kind, _)| *kind)
    }
}

/// Basic coordinates and effective model of one project in the build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectInfo {
    /// Group id of the project.
    pub group_id: String,
    /// Artifact id of the project.
    pub artifact_id: String,
    /// Version of the project.
    pub version: String,
    /// Base directory of the project.
    pub base_dir: PathBuf,
    /// Serialized effective build model of the project.
    pub model: String,
}

impl ProjectInfo {
    fn key(&self) -> String {
        format!(
            "{}\t{}\t{}\t{}\t{}",
            PROJECT_KEY_MARKER,
            self.group_id,
            self.artifact_id,
            self.version,
            self.base_dir.display()
        )
    }
}

/// A message exchanged between two endpoints, usually an IDE and a build.
///
/// Messages are immutable. They are either constructed locally from typed
/// data (session id assigned by the sender at send time) or decoded from
/// inbound bytes, in which case session id, thread id, and kind all come
/// from the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    session_id: Option<String>,
    thread_id: i64,
    kind: MessageKind,
    properties: Properties,
}

impl Message {
    /// Create a local message of the given kind.
    pub fn new(kind: MessageKind, properties: Properties, worker: WorkerId) -> Self {
        Self {
            session_id: None,
            thread_id: worker.as_i64(),
            kind,
            properties,
        }
    }

    /// Create a generic key/value message.
    pub fn generic(properties: Properties, worker: WorkerId) -> Self {
        Self::new(MessageKind::Generic, properties, worker)
    }

    /// Create a session start notification.
    pub fn session_start(execution_root: &Path, worker: WorkerId) -> Self {
        Self::session(execution_root, true, worker)
    }

    /// Create a session end notification.
    pub fn session_end(execution_root: &Path, worker: WorkerId) -> Self {
        Self::session(execution_root, false, worker)
    }

    fn session(execution_root: &Path, start: bool, worker: WorkerId) -> Self {
        let mut properties = Properties::new();
        properties.insert(SESSION_START.to_string(), Some(start.to_string()));
        properties.insert(
            SESSION_EXECUTION_ROOT_DIRECTORY.to_string(),
            Some(execution_root.display().to_string()),
        );
        Self::new(MessageKind::Session, properties, worker)
    }

    /// Create the one-shot notification listing every project in the build.
    pub fn projects_read<I>(projects: I, worker: WorkerId) -> Self
    where
        I: IntoIterator<Item = ProjectInfo>,
    {
        Self::new(
            MessageKind::ProjectsRead,
            Self::project_map(projects),
            worker,
        )
    }

    /// Create an incremental notification about changed projects.
    pub fn projects_changed<I>(projects: I, worker: WorkerId) -> Self
    where
        I: IntoIterator<Item = ProjectInfo>,
    {
        Self::new(MessageKind::Projects, Self::project_map(projects), worker)
    }

    fn project_map<I>(projects: I) -> Properties
    where
        I: IntoIterator<Item = ProjectInfo>,
    {
        projects
            .into_iter()
            .map(|project| (project.key(), Some(project.model)))
            .collect()
    }

    /// Create a notification that `path` should be refreshed.
    pub fn refresh(path: &Path, worker: WorkerId) -> Self {
        let mut properties = Properties::new();
        properties.insert(REFRESH_PATH.to_string(), Some(path.display().to_string()));
        Self::new(MessageKind::Refresh, properties, worker)
    }

    /// Creates a reply to a message using the thread id and session id from
    /// the original but with the provided payload.
    pub fn reply_to(original: &Message, payload: Option<Properties>) -> Self {
        Self {
            session_id: original.session_id.clone(),
            thread_id: original.thread_id,
            kind: MessageKind::Generic,
            properties: payload.unwrap_or_default(),
        }
    }

    /// The kind of this message.
    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    /// Identifier of the originating call context, diagnostic only.
    pub fn thread_id(&self) -> i64 {
        self.thread_id
    }

    /// The remote session id of this message.
    ///
    /// Only valid for messages that crossed the wire; asking a locally
    /// created message for its session id is a caller bug.
    pub fn session_id(&self) -> Result<&str> {
        self.session_id
            .as_deref()
            .ok_or(BuildwireError::LocalMessage)
    }

    /// The full property bag.
    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    /// Get a string property, `None` when absent or null.
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).and_then(|value| value.as_deref())
    }

    /// Get a string property with a default for absent or null values.
    pub fn property_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.property(key).unwrap_or(default)
    }

    /// Get a boolean property, `false` when absent, null, or not `true`.
    pub fn bool_property(&self, key: &str) -> bool {
        self.bool_property_or(key, false)
    }

    /// Get a boolean property with a default for absent or null values.
    pub fn bool_property_or(&self, key: &str, default: bool) -> bool {
        match self.property(key) {
            Some(value) => value.eq_ignore_ascii_case("true"),
            None => default,
        }
    }

    /// Whether this session message announces a session start.
    pub fn is_session_start(&self) -> bool {
        self.bool_property(SESSION_START)
    }

    /// Execution root directory of a session message.
    pub fn execution_root_directory(&self) -> Option<&str> {
        self.property(SESSION_EXECUTION_ROOT_DIRECTORY)
    }

    /// Path carried by a refresh message.
    pub fn refresh_path(&self) -> Option<PathBuf> {
        self.property(REFRESH_PATH).map(PathBuf::from)
    }

    /// Projects carried by a projects-read or projects-changed message.
    ///
    /// Properties whose key does not follow the per-project layout are
    /// skipped, so the same bag can carry additional entries.
    pub fn projects(&self) -> impl Iterator<Item = ProjectInfo> + '_ {
        self.properties.iter().filter_map(|(key, value)| {
            let fields: Vec<&str> = key.split('\t').collect();
            if fields.len() != PROJECT_KEY_FIELDS || fields[0] != PROJECT_KEY_MARKER {
                return None;
            }
            Some(ProjectInfo {
                group_id: fields[1].to_string(),
                artifact_id: fields[2].to_string(),
                version: fields[3].to_string(),
                base_dir: PathBuf::from(fields[4]),
                model: value.clone().unwrap_or_default(),
            })
        })
    }

    /// Encode this message, advertising `session_id` on the wire.
    ///
    /// The advertised id may differ from the message's own stored id, e.g.
    /// when a sender frames a local message under its session context.
    pub fn encode(&self, session_id: Option<&str>) -> Bytes {
        let mut buf = BytesMut::new();
        put_string(&mut buf, session_id);
        buf.put_i64(self.thread_id);
        put_string(&mut buf, Some(self.kind.tag()));
        buf.put_i32(self.properties.len() as i32);
        for (key, value) in &self.properties {
            put_string(&mut buf, Some(key));
            put_string(&mut buf, value.as_deref());
        }
        buf.freeze()
    }

    /// Encode this message under its own stored session id.
    pub fn encode_own(&self) -> Bytes {
        self.encode(self.session_id.as_deref())
    }

    /// Decode a message from a frame payload.
    ///
    /// The kind is selected through the tag table; unrecognized tags fall
    /// back to [`MessageKind::Generic`].
    pub fn decode(payload: &[u8]) -> std::result::Result<Self, DecodeError> {
        let mut reader = Reader::new(payload);
        let session_id = reader.read_string()?;
        let thread_id = reader.read_i64()?;
        let tag = reader.read_string()?.ok_or(DecodeError::UnexpectedNull)?;
        let count = reader.read_i32()?;
        if count < 0 {
            return Err(DecodeError::NegativePropertyCount(count));
        }
        let mut properties = Properties::new();
        for _ in 0..count {
            let key = reader.read_string()?.ok_or(DecodeError::UnexpectedNull)?;
            let value = reader.read_string()?;
            properties.insert(key, value);
        }
        Ok(Self {
            session_id,
            thread_id,
            kind: MessageKind::from_tag(&tag).unwrap_or(MessageKind::Generic),
            properties,
        })
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}][{}] {:?}",
            self.kind.tag(),
            self.session_id.as_deref().unwrap_or("local"),
            self.thread_id,
            self.properties
        )
    }
}
