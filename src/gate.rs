//! Sign-in gate in front of the conversation view.

use crate::auth::Session;
use crate::conversation::Conversation;

/// Sign-in form fields.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SignInForm {
    pub username: String,
    pub password: String,
}

impl SignInForm {
    pub fn is_complete(&self) -> bool {
        !self.username.trim().is_empty() && !self.password.is_empty()
    }
}

/// The conversation only exists while a session does.
#[derive(Debug)]
pub enum Gate {
    SignedOut {
        form: SignInForm,
        error: Option<String>,
    },
    SignedIn {
        session: Session,
        conversation: Conversation,
    },
}

impl Default for Gate {
    fn default() -> Self {
        Self::signed_out()
    }
}

impl Gate {
    pub fn signed_out() -> Self {
        Self::SignedOut {
            form: SignInForm::default(),
            error: None,
        }
    }

    pub fn is_signed_in(&self) -> bool {
        matches!(self, Self::SignedIn { .. })
    }

    pub fn conversation_mut(&mut self) -> Option<&mut Conversation> {
        match self {
            Self::SignedIn { conversation, .. } => Some(conversation),
            Self::SignedOut { .. } => None,
        }
    }

    /// Sign-in completed: open a fresh conversation for `session`.
    pub fn signed_in(&mut self, session: Session) {
        tracing::info!(username = %session.username, "session opened");
        *self = Self::SignedIn {
            session,
            conversation: Conversation::new(),
        };
    }

    /// Sign-in failed: stay on the form, keep the username, drop the password.
    pub fn sign_in_failed(&mut self, message: String) {
        if let Self::SignedOut { form, error } = self {
            form.password.clear();
            *error = Some(message);
        }
    }

    /// Cancel anything in flight and discard the session and its conversation.
    pub fn sign_out(&mut self) {
        if let Self::SignedIn { session, conversation } = self {
            conversation.cancel();
            tracing::info!(username = %session.username, "signed out");
        }
        *self = Self::signed_out();
    }
}
