use crate::command::RegistrationError;
use crate::context::SuggestionContext;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use litebot_types::{BlockPos, Dimension, Player};
use serde::{Serialize, Serializer};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;

/// Async completion source for an argument, answered on in-game TAB.
pub type Suggester =
    Arc<dyn Fn(SuggestionContext) -> BoxFuture<'static, anyhow::Result<Vec<String>>> + Send + Sync>;

/// The closed set of argument kinds a server command may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArgumentType {
    /// A single word.
    String,
    /// Free-form text running to the end of the input.
    Message,
    Integer,
    Boolean,
    Player,
    BlockPosition,
    Dimension,
}

impl ArgumentType {
    pub const ALL: [ArgumentType; 7] = [
        ArgumentType::String,
        ArgumentType::Message,
        ArgumentType::Integer,
        ArgumentType::Boolean,
        ArgumentType::Player,
        ArgumentType::BlockPosition,
        ArgumentType::Dimension,
    ];

    /// Tag the in-game mod uses to pick its own argument parser.
    pub fn tag(self) -> &'static str {
        match self {
            ArgumentType::String => "string",
            ArgumentType::Message => "message",
            ArgumentType::Integer => "integer",
            ArgumentType::Boolean => "boolean",
            ArgumentType::Player => "player",
            ArgumentType::BlockPosition => "block_pos",
            ArgumentType::Dimension => "dimension",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.tag() == tag)
    }

    /// Coerce a wire value into this kind. The error is a human readable reason.
    pub fn decode(self, value: &Value) -> Result<ArgumentValue, String> {
        match self {
            ArgumentType::String => scalar_string(value).map(ArgumentValue::String),
            ArgumentType::Message => scalar_string(value).map(ArgumentValue::Message),
            ArgumentType::Integer => match value {
                Value::Number(n) => n
                    .as_i64()
                    .map(ArgumentValue::Integer)
                    .ok_or_else(|| format!("{} is not an integer", n)),
                Value::String(s) => s
                    .trim()
                    .parse()
                    .map(ArgumentValue::Integer)
                    .map_err(|_| format!("'{}' is not an integer", s)),
                other => Err(format!("unexpected {}", json_kind(other))),
            },
            ArgumentType::Boolean => match value {
                Value::Bool(b) => Ok(ArgumentValue::Boolean(*b)),
                Value::String(s) if s.eq_ignore_ascii_case("true") => Ok(ArgumentValue::Boolean(true)),
                Value::String(s) if s.eq_ignore_ascii_case("false") => {
                    Ok(ArgumentValue::Boolean(false))
                }
                other => Err(format!("'{}' is not a boolean", other)),
            },
            ArgumentType::Player => {
                let player = match value {
                    Value::String(s) => serde_json::from_str::<Player>(s),
                    other => serde_json::from_value::<Player>(other.clone()),
                };
                player.map(ArgumentValue::Player).map_err(|e| e.to_string())
            }
            ArgumentType::BlockPosition => match value {
                Value::String(s) => s.parse().map(ArgumentValue::BlockPosition),
                Value::Array(items) => {
                    let coords: Option<Vec<i32>> = items
                        .iter()
                        .map(|v| v.as_i64().and_then(|n| i32::try_from(n).ok()))
                        .collect();
                    match coords.as_deref() {
                        Some(&[x, y, z]) => Ok(ArgumentValue::BlockPosition(BlockPos::new(x, y, z))),
                        _ => Err("expected three integer coordinates".to_string()),
                    }
                }
                other => serde_json::from_value::<BlockPos>(other.clone())
                    .map(ArgumentValue::BlockPosition)
                    .map_err(|e| e.to_string()),
            },
            ArgumentType::Dimension => match value {
                Value::String(s) => s.parse().map(ArgumentValue::Dimension),
                other => Err(format!("unexpected {}", json_kind(other))),
            },
        }
    }
}

impl Serialize for ArgumentType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.tag())
    }
}

fn scalar_string(value: &Value) -> Result<String, String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        other => Err(format!("unexpected {}", json_kind(other))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// A decoded argument.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgumentValue {
    String(String),
    Message(String),
    Integer(i64),
    Boolean(bool),
    Player(Player),
    BlockPosition(BlockPos),
    Dimension(Dimension),
}

impl ArgumentValue {
    pub fn kind(&self) -> ArgumentType {
        match self {
            ArgumentValue::String(_) => ArgumentType::String,
            ArgumentValue::Message(_) => ArgumentType::Message,
            ArgumentValue::Integer(_) => ArgumentType::Integer,
            ArgumentValue::Boolean(_) => ArgumentType::Boolean,
            ArgumentValue::Player(_) => ArgumentType::Player,
            ArgumentValue::BlockPosition(_) => ArgumentType::BlockPosition,
            ArgumentValue::Dimension(_) => ArgumentType::Dimension,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ArgumentValue::String(s) | ArgumentValue::Message(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            ArgumentValue::Integer(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ArgumentValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_player(&self) -> Option<&Player> {
        match self {
            ArgumentValue::Player(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_block_pos(&self) -> Option<BlockPos> {
        match self {
            ArgumentValue::BlockPosition(pos) => Some(*pos),
            _ => None,
        }
    }

    pub fn as_dimension(&self) -> Option<&Dimension> {
        match self {
            ArgumentValue::Dimension(d) => Some(d),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArgumentError {
    #[error("Missing required argument '{0}'")]
    Missing(String),
    #[error("Argument '{name}' must be a {expected}: {reason}")]
    Mismatch {
        name: String,
        expected: &'static str,
        reason: String,
    },
}

/// One declared argument of a server command.
#[derive(Clone)]
pub struct Argument {
    pub name: String,
    pub kind: ArgumentType,
    pub optional: bool,
    suggester: Option<Suggester>,
}

impl Argument {
    pub fn required(name: impl Into<String>, kind: ArgumentType) -> Self {
        Self {
            name: name.into(),
            kind,
            optional: false,
            suggester: None,
        }
    }

    pub fn optional(name: impl Into<String>, kind: ArgumentType) -> Self {
        Self {
            optional: true,
            ..Self::required(name, kind)
        }
    }

    /// Build from a textual type tag, as found in declarative command schemas.
    pub fn from_tag(
        name: impl Into<String>,
        tag: &str,
        optional: bool,
    ) -> Result<Self, RegistrationError> {
        let name = name.into();
        let kind = ArgumentType::from_tag(tag).ok_or_else(|| RegistrationError::UnknownArgumentType {
            argument: name.clone(),
            tag: tag.to_string(),
        })?;
        Ok(Self {
            optional,
            ..Self::required(name, kind)
        })
    }

    /// Attach a TAB-completion source.
    pub fn suggests<F, Fut>(mut self, suggester: F) -> Self
    where
        F: Fn(SuggestionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Vec<String>>> + Send + 'static,
    {
        self.suggester = Some(Arc::new(move |ctx| suggester(ctx).boxed()));
        self
    }

    pub fn suggester(&self) -> Option<&Suggester> {
        self.suggester.as_ref()
    }

    /// Decode this argument's raw wire value. Absent or `null` values are
    /// only allowed for optional arguments.
    pub fn decode(&self, raw: Option<&Value>) -> Result<Option<ArgumentValue>, ArgumentError> {
        match raw {
            None | Some(Value::Null) if self.optional => Ok(None),
            None | Some(Value::Null) => Err(ArgumentError::Missing(self.name.clone())),
            Some(value) => self
                .kind
                .decode(value)
                .map(Some)
                .map_err(|reason| ArgumentError::Mismatch {
                    name: self.name.clone(),
                    expected: self.kind.tag(),
                    reason,
                }),
        }
    }
}

impl std::fmt::Debug for Argument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Argument")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("optional", &self.optional)
            .field("suggests", &self.suggester.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tags_roundtrip() {
        for kind in ArgumentType::ALL {
            assert_eq!(ArgumentType::from_tag(kind.tag()), Some(kind));
        }
        assert_eq!(ArgumentType::from_tag("float"), None);
    }

    #[test]
    fn test_decode_scalars() {
        assert_eq!(
            ArgumentType::Integer.decode(&json!("42")),
            Ok(ArgumentValue::Integer(42))
        );
        assert_eq!(
            ArgumentType::Integer.decode(&json!(-7)),
            Ok(ArgumentValue::Integer(-7))
        );
        assert!(ArgumentType::Integer.decode(&json!("4.5")).is_err());
        assert_eq!(
            ArgumentType::Boolean.decode(&json!("TRUE")),
            Ok(ArgumentValue::Boolean(true))
        );
        assert!(ArgumentType::Boolean.decode(&json!(1)).is_err());
        assert_eq!(
            ArgumentType::Message.decode(&json!("hello there")),
            Ok(ArgumentValue::Message("hello there".into()))
        );
        assert!(ArgumentType::String.decode(&json!({"a": 1})).is_err());
    }

    #[test]
    fn test_decode_structured() {
        let expected = ArgumentValue::BlockPosition(BlockPos::new(1, -2, 3));
        assert_eq!(ArgumentType::BlockPosition.decode(&json!("1 -2 3")), Ok(expected.clone()));
        assert_eq!(ArgumentType::BlockPosition.decode(&json!([1, -2, 3])), Ok(expected.clone()));
        assert_eq!(
            ArgumentType::BlockPosition.decode(&json!({"x": 1, "y": -2, "z": 3})),
            Ok(expected)
        );
        assert!(ArgumentType::BlockPosition.decode(&json!([1, 2])).is_err());

        assert_eq!(
            ArgumentType::Dimension.decode(&json!("minecraft:the_end")),
            Ok(ArgumentValue::Dimension(Dimension::End))
        );

        let player = json!({
            "name": "Alex",
            "uuid": "ec561538-f3fd-461d-aff5-086b22154bce",
            "opLevel": 2
        });
        let decoded = ArgumentType::Player.decode(&player).unwrap();
        assert_eq!(decoded.as_player().map(|p| p.name.as_str()), Some("Alex"));
        let as_text = Value::String(player.to_string());
        assert_eq!(ArgumentType::Player.decode(&as_text).unwrap(), decoded);
    }

    #[test]
    fn test_argument_decode_optional() {
        let required = Argument::required("count", ArgumentType::Integer);
        let optional = Argument::optional("count", ArgumentType::Integer);
        assert_eq!(
            required.decode(None),
            Err(ArgumentError::Missing("count".into()))
        );
        assert_eq!(optional.decode(Some(&Value::Null)), Ok(None));
        assert!(matches!(
            required.decode(Some(&json!("many"))),
            Err(ArgumentError::Mismatch { expected: "integer", .. })
        ));
    }

    #[test]
    fn test_from_tag_rejects_unknown() {
        assert!(Argument::from_tag("pos", "block_pos", false).is_ok());
        assert_eq!(
            Argument::from_tag("speed", "float", true).unwrap_err(),
            RegistrationError::UnknownArgumentType {
                argument: "speed".into(),
                tag: "float".into(),
            }
        );
    }
}
