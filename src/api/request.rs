//! Model-facing message structures

use serde::{Deserialize, Serialize};

/// A message in a conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn is_system(&self) -> bool {
        self.role == Role::System
    }
}

/// Raw prompt material handed to the optimizer by the agent wrapper
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizeRequest {
    /// Static instructions
    pub system_prompt: String,

    /// Agent persona text
    pub persona: String,

    /// Prior turns, oldest first
    pub conversation_history: Vec<Message>,

    /// Code or document context for this call
    pub code_context: String,

    /// The live user query
    pub user_query: String,

    /// Explicit task label (`quick_fix`, `review`, ...); classified when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_type: Option<String>,
}

impl OptimizeRequest {
    pub fn new(user_query: impl Into<String>) -> Self {
        Self {
            user_query: user_query.into(),
            ..Default::default()
        }
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = system_prompt.into();
        self
    }

    pub fn with_persona(mut self, persona: impl Into<String>) -> Self {
        self.persona = persona.into();
        self
    }

    pub fn with_history(mut self, history: Vec<Message>) -> Self {
        self.conversation_history = history;
        self
    }

    pub fn with_code_context(mut self, code_context: impl Into<String>) -> Self {
        self.code_context = code_context.into();
        self
    }

    pub fn with_task_type(mut self, task_type: impl Into<String>) -> Self {
        self.task_type = Some(task_type.into());
        self
    }

    /// Full-size message list, for callers that bypass optimization.
    ///
    /// Same section order as an optimized result, nothing trimmed.
    pub fn to_unoptimized_messages(&self) -> Vec<Message> {
        let mut messages = Vec::with_capacity(self.conversation_history.len() + 3);

        if !self.system_prompt.is_empty() {
            messages.push(Message::system(self.system_prompt.clone()));
        }
        if !self.persona.is_empty() {
            messages.push(Message::system(self.persona.clone()));
        }
        messages.extend(self.conversation_history.iter().cloned());
        messages.push(Message::user(compose_user_turn(
            &self.code_context,
            &self.user_query,
        )));

        messages
    }
}

/// Combine context and query into the final user turn
pub fn compose_user_turn(context: &str, query: &str) -> String {
    if context.is_empty() {
        query.to_string()
    } else {
        format!("Context:\n{}\n\n{}", context, query)
    }
}
