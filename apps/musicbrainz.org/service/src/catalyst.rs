//! Sanitized Catalyst context and the global namespace slot it travels through.
//!
//! The server serializes one [`GlobalNamespace`] per page into an inline
//! script that assigns `window[GLOBAL_JS_NAMESPACE]`. Renderers receive the
//! context explicitly; the process-wide slot below only exists for code that
//! runs outside a renderer and is populated once with
//! [`install_global_namespace`].

use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

pub const GLOBAL_JS_NAMESPACE: &str = "__MB__";

const ENTITY_TYPE_KEY: &str = "entityType";

static GLOBAL_SLOT: OnceLock<GlobalNamespace> = OnceLock::new();

#[derive(Debug, Error)]
pub enum CatalystError {
    #[error("invalid global namespace payload: {source}")]
    InvalidGlobalNamespace {
        #[source]
        source: serde_json::Error,
    },
    #[error("globals script does not assign the global namespace")]
    MissingAssignment,
    #[error("global namespace is already installed")]
    AlreadyInstalled,
    #[error("failed to serialize global namespace: {source}")]
    Serialize {
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoreEntityType {
    Area,
    Artist,
    Event,
    Genre,
    Instrument,
    Label,
    Place,
    Recording,
    Release,
    ReleaseGroup,
    Series,
    Url,
    Work,
}

impl CoreEntityType {
    const ALL: [Self; 13] = [
        Self::Area,
        Self::Artist,
        Self::Event,
        Self::Genre,
        Self::Instrument,
        Self::Label,
        Self::Place,
        Self::Recording,
        Self::Release,
        Self::ReleaseGroup,
        Self::Series,
        Self::Url,
        Self::Work,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Area => "area",
            Self::Artist => "artist",
            Self::Event => "event",
            Self::Genre => "genre",
            Self::Instrument => "instrument",
            Self::Label => "label",
            Self::Place => "place",
            Self::Recording => "recording",
            Self::Release => "release",
            Self::ReleaseGroup => "release_group",
            Self::Series => "series",
            Self::Url => "url",
            Self::Work => "work",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|entity_type| entity_type.as_str() == tag)
    }
}

/// A database entity addressed by its MBID. Fields other than the four
/// shared by every entity are kept in `extra`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoreEntity {
    #[serde(rename = "entityType")]
    pub entity_type: CoreEntityType,
    pub id: u64,
    pub gid: Uuid,
    pub name: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// The primary entity of a page as the server stored it: a full entity, a
/// partial one, or only `{"entityType": ...}` when the entity itself could
/// not be loaded (e.g. on not-found pages).
///
/// The payload is kept verbatim; the accessors are views over it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct SourceEntity(Value);

impl SourceEntity {
    pub fn type_only(entity_type: CoreEntityType) -> Self {
        let mut object = Map::new();
        object.insert(ENTITY_TYPE_KEY.to_string(), entity_type.as_str().into());
        Self(Value::Object(object))
    }

    /// The `entityType` tag, including tags without a [`CoreEntityType`].
    pub fn entity_type(&self) -> &str {
        self.0
            .get(ENTITY_TYPE_KEY)
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    pub fn core_entity_type(&self) -> Option<CoreEntityType> {
        CoreEntityType::from_tag(self.entity_type())
    }

    /// True only for an object whose sole key is `entityType`.
    pub fn is_type_only(&self) -> bool {
        self.0.as_object().is_some_and(|object| object.len() == 1)
    }

    /// The typed view, when the payload carries every [`CoreEntity`] field.
    pub fn as_core_entity(&self) -> Option<CoreEntity> {
        if self.is_type_only() {
            return None;
        }
        CoreEntity::deserialize(&self.0).ok()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }
}

impl TryFrom<Value> for SourceEntity {
    type Error = String;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value.get(ENTITY_TYPE_KEY) {
            Some(Value::String(_)) => Ok(Self(value)),
            _ => Err(format!(
                "source entity must be an object with a string {ENTITY_TYPE_KEY}"
            )),
        }
    }
}

impl From<SourceEntity> for Value {
    fn from(entity: SourceEntity) -> Self {
        entity.0
    }
}

impl From<CoreEntity> for SourceEntity {
    fn from(entity: CoreEntity) -> Self {
        let mut object = Map::new();
        object.insert(
            ENTITY_TYPE_KEY.to_string(),
            entity.entity_type.as_str().into(),
        );
        object.insert("id".to_string(), entity.id.into());
        object.insert("gid".to_string(), entity.gid.to_string().into());
        object.insert("name".to_string(), entity.name.into());
        object.extend(entity.extra);
        Self(Value::Object(object))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveEditor {
    pub id: u64,
    pub name: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SanitizedStash {
    #[serde(default)]
    pub current_language: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_entity: Option<SourceEntity>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Request-scoped data that is safe to expose to client code. Keys this
/// crate does not model are carried through in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SanitizedCatalystContext {
    #[serde(default)]
    pub relative_uri: String,
    #[serde(default)]
    pub stash: SanitizedStash,
    #[serde(default)]
    pub user: Option<ActiveEditor>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SanitizedCatalystContext {
    pub fn source_entity(&self) -> Option<&SourceEntity> {
        self.stash.source_entity.as_ref()
    }
}

/// Contents of `window[GLOBAL_JS_NAMESPACE]`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalNamespace {
    #[serde(rename = "$c", default, skip_serializing_if = "Option::is_none")]
    pub catalyst: Option<SanitizedCatalystContext>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl GlobalNamespace {
    pub fn new(context: SanitizedCatalystContext) -> Self {
        Self {
            catalyst: Some(context),
            extra: Map::new(),
        }
    }

    pub fn from_json_str(raw: &str) -> Result<Self, CatalystError> {
        serde_json::from_str(raw).map_err(|source| CatalystError::InvalidGlobalNamespace { source })
    }

    /// Parses the body of the script produced by [`GlobalNamespace::to_globals_script`].
    pub fn from_globals_script(script: &str) -> Result<Self, CatalystError> {
        let payload = script
            .trim()
            .strip_prefix(&assignment_target())
            .and_then(|rest| rest.trim_start().strip_prefix('='))
            .map(|rest| rest.trim().trim_end_matches(';'))
            .ok_or(CatalystError::MissingAssignment)?;
        Self::from_json_str(payload)
    }

    /// JSON that can be embedded verbatim inside a `<script>` element.
    pub fn to_script_json(&self) -> Result<String, CatalystError> {
        let json =
            serde_json::to_string(self).map_err(|source| CatalystError::Serialize { source })?;
        Ok(escape_script_json(&json))
    }

    pub fn to_globals_script(&self) -> Result<String, CatalystError> {
        Ok(format!("{}={};", assignment_target(), self.to_script_json()?))
    }

    /// Returns `$c`. A page without it was rendered by a broken template, so
    /// this does not return an error.
    #[track_caller]
    pub fn catalyst_context(&self) -> &SanitizedCatalystContext {
        match self.catalyst.as_ref() {
            Some(context) => context,
            None => context_missing(),
        }
    }

    pub fn source_entity_data(&self) -> Option<&SourceEntity> {
        self.catalyst_context().source_entity()
    }
}

/// Populates the process-wide slot. Only the first call succeeds.
pub fn install_global_namespace(namespace: GlobalNamespace) -> Result<(), CatalystError> {
    GLOBAL_SLOT
        .set(namespace)
        .map_err(|_| CatalystError::AlreadyInstalled)?;
    tracing::debug!(namespace = GLOBAL_JS_NAMESPACE, "global namespace installed");
    Ok(())
}

/// Reads `$c` from the process-wide slot.
///
/// # Panics
///
/// Panics when the slot was never installed or holds no `$c`.
#[track_caller]
pub fn catalyst_context() -> &'static SanitizedCatalystContext {
    match GLOBAL_SLOT.get() {
        Some(namespace) => namespace.catalyst_context(),
        None => context_missing(),
    }
}

pub fn source_entity_data() -> Option<&'static SourceEntity> {
    catalyst_context().source_entity()
}

#[track_caller]
#[expect(clippy::panic)]
fn context_missing() -> ! {
    panic!("Catalyst context not found in {GLOBAL_JS_NAMESPACE}")
}

fn assignment_target() -> String {
    format!("window[\"{GLOBAL_JS_NAMESPACE}\"]")
}

// `<`, `>` and `&` only occur inside JSON strings, so unicode escapes keep the
// value intact while preventing `</script>` from terminating the element.
fn escape_script_json(json: &str) -> String {
    let mut escaped = String::with_capacity(json.len());
    for ch in json.chars() {
        match ch {
            '<' => escaped.push_str("\\u003c"),
            '>' => escaped.push_str("\\u003e"),
            '&' => escaped.push_str("\\u0026"),
            '\u{2028}' => escaped.push_str("\\u2028"),
            '\u{2029}' => escaped.push_str("\\u2029"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::{
        CatalystError, CoreEntity, CoreEntityType, GlobalNamespace, SanitizedCatalystContext,
        SanitizedStash, SourceEntity,
    };
    use serde_json::{Map, Value, json};
    use uuid::Uuid;

    fn artist() -> CoreEntity {
        CoreEntity {
            entity_type: CoreEntityType::Artist,
            id: 11_545,
            gid: Uuid::parse_str("a74b1b7f-71a5-4011-9441-d0b5e4122711").expect("valid uuid"),
            name: "Radiohead".to_string(),
            extra: Map::new(),
        }
    }

    fn namespace_with(source_entity: Option<SourceEntity>) -> GlobalNamespace {
        GlobalNamespace::new(SanitizedCatalystContext {
            relative_uri: "/artist/a74b1b7f-71a5-4011-9441-d0b5e4122711".to_string(),
            stash: SanitizedStash {
                current_language: "en".to_string(),
                source_entity,
                ..SanitizedStash::default()
            },
            ..SanitizedCatalystContext::default()
        })
    }

    fn stored_entity(source_entity: &Value) -> GlobalNamespace {
        let raw = json!({ "$c": { "stash": { "source_entity": source_entity } } });
        GlobalNamespace::from_json_str(&raw.to_string()).expect("namespace parses")
    }

    #[test]
    fn source_entity_data_is_none_when_stash_has_no_entity() {
        let namespace = namespace_with(None);
        assert_eq!(namespace.source_entity_data(), None);
    }

    #[test]
    fn source_entity_data_returns_the_stored_entity() {
        let entity = SourceEntity::from(artist());
        let namespace = namespace_with(Some(entity.clone()));
        assert_eq!(namespace.source_entity_data(), Some(&entity));
    }

    #[test]
    #[should_panic(expected = "Catalyst context not found in __MB__")]
    fn catalyst_context_panics_without_dollar_c() {
        let namespace = GlobalNamespace::from_json_str("{}").expect("empty namespace parses");
        let _ = namespace.catalyst_context();
    }

    #[test]
    fn type_only_source_entity_parses_from_minimal_shape() {
        let namespace = stored_entity(&json!({ "entityType": "url" }));
        let entity = namespace.source_entity_data().expect("source entity");
        assert_eq!(entity, &SourceEntity::type_only(CoreEntityType::Url));
        assert!(entity.is_type_only());
        assert_eq!(entity.as_core_entity(), None);
    }

    #[test]
    fn full_entity_exposes_the_typed_view() {
        let namespace = stored_entity(&json!({
            "entityType": "artist",
            "id": 11545,
            "gid": "a74b1b7f-71a5-4011-9441-d0b5e4122711",
            "name": "Radiohead",
        }));
        let entity = namespace.source_entity_data().expect("source entity");
        assert_eq!(entity, &SourceEntity::from(artist()));
        assert_eq!(entity.as_core_entity(), Some(artist()));
        assert_eq!(entity.core_entity_type(), Some(CoreEntityType::Artist));
        assert!(!entity.is_type_only());
    }

    #[test]
    fn entity_fields_beyond_the_core_four_survive_a_round_trip() {
        let stored = json!({
            "entityType": "artist",
            "id": 1,
            "gid": "a74b1b7f-71a5-4011-9441-d0b5e4122711",
            "name": "Radiohead",
            "comment": "UK band",
            "editsPending": false,
        });
        let namespace = stored_entity(&stored);
        let entity = namespace.source_entity_data().expect("source entity");
        assert_eq!(entity.as_value(), &stored);

        let reparsed =
            GlobalNamespace::from_json_str(&namespace.to_script_json().expect("serializes"))
                .expect("namespace parses");
        assert_eq!(reparsed.source_entity_data().map(SourceEntity::as_value), Some(&stored));

        let typed = entity.as_core_entity().expect("typed view");
        assert_eq!(typed.extra.get("comment"), Some(&json!("UK band")));
        assert_eq!(SourceEntity::from(typed).as_value(), &stored);
    }

    #[test]
    fn partial_entity_is_not_mistaken_for_the_type_only_shape() {
        let stored = json!({ "entityType": "artist", "id": 1, "name": "Radiohead" });
        let namespace = stored_entity(&stored);
        let entity = namespace.source_entity_data().expect("source entity");

        assert!(!entity.is_type_only());
        assert_eq!(entity.as_value(), &stored);
        assert_eq!(entity.get("name"), Some(&json!("Radiohead")));
        assert_eq!(entity.as_core_entity(), None);
    }

    #[test]
    fn unknown_entity_types_are_accepted() {
        let namespace = stored_entity(&json!({ "entityType": "collection" }));
        let entity = namespace.source_entity_data().expect("source entity");
        assert_eq!(entity.entity_type(), "collection");
        assert_eq!(entity.core_entity_type(), None);
        assert!(entity.is_type_only());
    }

    #[test]
    fn source_entity_without_a_type_tag_is_rejected() {
        let raw = r#"{"$c":{"stash":{"source_entity":{"id":1}}}}"#;
        let error = GlobalNamespace::from_json_str(raw).expect_err("untagged entity");
        assert!(matches!(error, CatalystError::InvalidGlobalNamespace { .. }));
    }

    #[test]
    fn unmodelled_context_keys_are_carried_through() {
        let raw = json!({
            "$c": {
                "relative_uri": "/",
                "stash": { "current_language": "en", "server_languages": ["en", "fr"] },
                "user": { "id": 1, "name": "editor", "preferences": { "timezone": "UTC" } },
                "session": { "tport": 8080 },
            },
            "DBDefs": { "GIT_BRANCH": "production" },
        });
        let namespace = GlobalNamespace::from_json_str(&raw.to_string()).expect("namespace parses");
        let context = namespace.catalyst_context();
        assert_eq!(
            context.stash.extra.get("server_languages"),
            Some(&json!(["en", "fr"]))
        );

        let written: Value = serde_json::from_str(&namespace.to_script_json().expect("serializes"))
            .expect("script json is json");
        assert_eq!(written, raw);
    }

    #[test]
    fn script_json_cannot_close_the_script_element() {
        let mut entity = artist();
        entity.name = "</script><b>Tom & Jerry</b>".to_string();
        let namespace = namespace_with(Some(SourceEntity::from(entity.clone())));

        let json = namespace.to_script_json().expect("serializes");
        assert!(!json.contains("</script>"));
        assert!(!json.contains('&'));
        assert!(json.contains("\\u003c/script\\u003e"));

        let parsed = GlobalNamespace::from_json_str(&json).expect("escaped json parses");
        assert_eq!(parsed.source_entity_data(), Some(&SourceEntity::from(entity)));
    }

    #[test]
    fn globals_script_round_trips_through_the_reader() {
        let namespace = namespace_with(Some(SourceEntity::type_only(CoreEntityType::Work)));
        let script = namespace.to_globals_script().expect("serializes");
        assert!(script.starts_with("window[\"__MB__\"]="));
        assert_eq!(
            GlobalNamespace::from_globals_script(&script).expect("parses"),
            namespace
        );
    }

    #[test]
    fn globals_script_reader_rejects_other_assignments() {
        let error = GlobalNamespace::from_globals_script("window.other={};")
            .expect_err("foreign assignment is rejected");
        assert!(matches!(error, CatalystError::MissingAssignment));

        let error = GlobalNamespace::from_globals_script("window[\"__MB__\"]={not json};")
            .expect_err("malformed payload is rejected");
        assert!(matches!(error, CatalystError::InvalidGlobalNamespace { .. }));
    }

    #[test]
    fn absent_source_entity_is_not_serialized() {
        let json = namespace_with(None).to_script_json().expect("serializes");
        assert!(!json.contains("source_entity"));
        assert!(json.starts_with("{\"$c\":"));
    }
}
