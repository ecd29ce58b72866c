//! The fixed vocabulary of operations the bridge forwards.

use std::{fmt, str::FromStr};

use thiserror::Error;

/// A method outside the fixed vocabulary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unsupported method: {0}")]
pub struct UnsupportedMethod(pub String);

/// Remote operations a session can perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Complete,
    GetPrompt,
    ListPrompts,
    ListResources,
    ListResourceTemplates,
    ReadResource,
    SubscribeResource,
    UnsubscribeResource,
    CallTool,
    ListTools,
    SetLoggingLevel,
    Ping,
}

impl Method {
    /// Every supported method.
    pub const ALL: [Self; 12] = [
        Self::Complete,
        Self::GetPrompt,
        Self::ListPrompts,
        Self::ListResources,
        Self::ListResourceTemplates,
        Self::ReadResource,
        Self::SubscribeResource,
        Self::UnsubscribeResource,
        Self::CallTool,
        Self::ListTools,
        Self::SetLoggingLevel,
        Self::Ping,
    ];

    /// Name accepted in the inbound envelope.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Complete => "complete",
            Self::GetPrompt => "getPrompt",
            Self::ListPrompts => "listPrompts",
            Self::ListResources => "listResources",
            Self::ListResourceTemplates => "listResourceTemplates",
            Self::ReadResource => "readResource",
            Self::SubscribeResource => "subscribeResource",
            Self::UnsubscribeResource => "unsubscribeResource",
            Self::CallTool => "callTool",
            Self::ListTools => "listTools",
            Self::SetLoggingLevel => "setLoggingLevel",
            Self::Ping => "ping",
        }
    }

    /// JSON-RPC method sent to the remote peer.
    #[must_use]
    pub const fn wire_name(self) -> &'static str {
        match self {
            Self::Complete => "completion/complete",
            Self::GetPrompt => "prompts/get",
            Self::ListPrompts => "prompts/list",
            Self::ListResources => "resources/list",
            Self::ListResourceTemplates => "resources/templates/list",
            Self::ReadResource => "resources/read",
            Self::SubscribeResource => "resources/subscribe",
            Self::UnsubscribeResource => "resources/unsubscribe",
            Self::CallTool => "tools/call",
            Self::ListTools => "tools/list",
            Self::SetLoggingLevel => "logging/setLevel",
            Self::Ping => "ping",
        }
    }
}

impl FromStr for Method {
    type Err = UnsupportedMethod;

    /// Accepts either the envelope name or the wire name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|m| m.name() == s || m.wire_name() == s)
            .ok_or_else(|| UnsupportedMethod(s.to_string()))
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_both_spellings() {
        assert_eq!("listTools".parse::<Method>().unwrap(), Method::ListTools);
        assert_eq!("tools/list".parse::<Method>().unwrap(), Method::ListTools);
        assert_eq!("setLoggingLevel".parse::<Method>().unwrap(), Method::SetLoggingLevel);
        assert_eq!("logging/setLevel".parse::<Method>().unwrap(), Method::SetLoggingLevel);
        assert_eq!(
            "resources/templates/list".parse::<Method>().unwrap(),
            Method::ListResourceTemplates
        );
    }

    #[test]
    fn test_unknown_method_is_unsupported() {
        let err = "not/real".parse::<Method>().unwrap_err();
        assert_eq!(err, UnsupportedMethod("not/real".to_string()));
        assert!("initialize".parse::<Method>().is_err());
        assert!("ListTools".parse::<Method>().is_err());
    }

    #[test]
    fn test_every_method_round_trips_by_name() {
        for method in Method::ALL {
            assert_eq!(method.name().parse::<Method>().unwrap(), method);
            assert_eq!(method.wire_name().parse::<Method>().unwrap(), method);
        }
    }
}
