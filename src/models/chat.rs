use serde::{ Deserialize, Serialize };

use crate::error::{ RelayError, Result };

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    #[serde(alias = "model")]
    Assistant,
}

impl Role {
    /// Role name on the Gemini wire, which calls the assistant `model`.
    pub fn as_gemini(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "model",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self { role: Role::User, text: text.into() }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self { role: Role::Assistant, text: text.into() }
    }
}

/// Body of `POST /api/chat`.
///
/// Two shapes are accepted: the flat `{ "prompt": ... }` form and the
/// structured `{ "contents": [...], "systemInstruction": ... }` form. A body
/// carrying both is ambiguous and rejected.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contents: Option<Vec<Turn>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<String>,
}

/// A validated request: at least one turn with text.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Conversation {
    pub turns: Vec<Turn>,
    pub system_instruction: Option<String>,
}

impl ChatRequest {
    pub fn prompt(prompt: impl Into<String>) -> Self {
        Self { prompt: Some(prompt.into()), ..Default::default() }
    }

    pub fn conversation(turns: Vec<Turn>, system_instruction: Option<String>) -> Self {
        Self { prompt: None, contents: Some(turns), system_instruction }
    }

    pub fn from_slice(body: &[u8]) -> Result<Self> {
        serde_json::from_slice(body).map_err(|e| {
            RelayError::invalid_request(format!("Invalid JSON body: {}", e))
        })
    }

    pub fn into_conversation(self) -> Result<Conversation> {
        let system_instruction = self.system_instruction.filter(|s| !s.trim().is_empty());

        let turns = match (self.prompt, self.contents) {
            (Some(_), Some(_)) => {
                return Err(
                    RelayError::invalid_request("Request must use either prompt or contents, not both")
                );
            }
            (_, Some(contents)) => {
                let turns: Vec<Turn> = contents
                    .into_iter()
                    .filter(|t| !t.text.trim().is_empty())
                    .collect();
                if turns.is_empty() {
                    return Err(RelayError::invalid_request("No contents provided"));
                }
                turns
            }
            (Some(prompt), None) if !prompt.trim().is_empty() => vec![Turn::user(prompt)],
            _ => {
                return Err(RelayError::invalid_request("No prompt provided"));
            }
        };

        Ok(Conversation { turns, system_instruction })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(body: &str) -> Result<Conversation> {
        ChatRequest::from_slice(body.as_bytes())?.into_conversation()
    }

    #[test]
    fn flat_prompt_becomes_single_user_turn() {
        let conv = parse(r#"{"prompt":"こんにちは"}"#).unwrap();
        assert_eq!(conv.turns, vec![Turn::user("こんにちは")]);
        assert_eq!(conv.system_instruction, None);
    }

    #[test]
    fn structured_contents_keep_order_and_instruction() {
        let conv = parse(
            r#"{
                "contents": [
                    {"role":"user","text":"hi"},
                    {"role":"model","text":"hello"},
                    {"role":"user","text":"how are you?"}
                ],
                "systemInstruction": "Answer in Japanese."
            }"#
        ).unwrap();
        assert_eq!(conv.turns, vec![
            Turn::user("hi"),
            Turn::assistant("hello"),
            Turn::user("how are you?")
        ]);
        assert_eq!(conv.system_instruction.as_deref(), Some("Answer in Japanese."));
    }

    #[test]
    fn empty_bodies_are_rejected() {
        for body in [
            r#"{}"#,
            r#"{"prompt":""}"#,
            r#"{"prompt":"   "}"#,
            r#"{"contents":[]}"#,
        ] {
            let err = parse(body).unwrap_err();
            assert!(matches!(err, RelayError::InvalidRequest(_)), "{} accepted", body);
        }
    }

    #[test]
    fn blank_turns_are_dropped() {
        let conv = parse(
            r#"{"contents":[{"role":"assistant","text":""},{"role":"user","text":"q"}]}"#
        ).unwrap();
        assert_eq!(conv.turns, vec![Turn::user("q")]);

        let err = parse(r#"{"contents":[{"role":"user","text":"  "}]}"#).unwrap_err();
        assert_eq!(err.to_string(), "No contents provided");
    }

    #[test]
    fn both_shapes_together_are_rejected() {
        let err = parse(r#"{"prompt":"a","contents":[{"role":"user","text":"b"}]}"#).unwrap_err();
        assert!(matches!(err, RelayError::InvalidRequest(_)));
    }

    #[test]
    fn malformed_json_is_a_client_error() {
        let err = parse("not json").unwrap_err();
        assert!(err.to_string().starts_with("Invalid JSON body"));
    }

    #[test]
    fn blank_system_instruction_is_ignored() {
        let conv = parse(r#"{"prompt":"x","systemInstruction":"   "}"#).unwrap();
        assert_eq!(conv.system_instruction, None);
    }

    #[test]
    fn unknown_role_is_rejected() {
        let err = parse(r#"{"contents":[{"role":"system","text":"x"}]}"#).unwrap_err();
        assert!(matches!(err, RelayError::InvalidRequest(_)));
    }
}
