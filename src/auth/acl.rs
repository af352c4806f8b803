//! Public-method policy shared by both transports.

use std::collections::HashSet;
use tonic::Status;

use super::AuthenticationResult;

pub const AUTHENTICATION_REQUIRED: &str = "authentication required";

/// RPC methods callable without credentials
const PUBLIC_METHODS: &[&str] = &[
    "/memos.api.v1.InstanceService/GetInstanceProfile",
    "/memos.api.v1.InstanceService/GetInstanceSetting",
    "/memos.api.v1.AuthService/CreateSession",
    "/memos.api.v1.AuthService/RefreshToken",
    "/memos.api.v1.UserService/CreateUser",
    "/memos.api.v1.UserService/GetUser",
    "/memos.api.v1.UserService/GetUserAvatar",
    "/memos.api.v1.UserService/GetUserStats",
    "/memos.api.v1.UserService/ListAllUserStats",
    "/memos.api.v1.UserService/SearchUsers",
    "/memos.api.v1.IdentityProviderService/ListIdentityProviders",
    "/memos.api.v1.MemoService/GetMemo",
    "/memos.api.v1.MemoService/ListMemos",
    "/memos.api.v1.MemoService/ListMemoComments",
    "/memos.api.v1.MemoService/ListMemoReactions",
    "/memos.api.v1.MemoService/ListMemoAttachments",
    "/memos.api.v1.MemoService/ListMemoRelations",
    "/memos.api.v1.AttachmentService/GetAttachmentBinary",
];

/// Fully-qualified method names exempt from authentication
#[derive(Debug, Clone)]
pub struct PublicMethodSet {
    methods: HashSet<String>,
}

impl PublicMethodSet {
    pub fn new<I, S>(methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            methods: methods.into_iter().map(Into::into).collect(),
        }
    }

    /// The memos API's public methods
    pub fn standard() -> Self {
        Self::new(PUBLIC_METHODS.iter().copied())
    }

    pub fn contains(&self, method: &str) -> bool {
        self.methods.contains(method)
    }
}

impl Default for PublicMethodSet {
    fn default() -> Self {
        Self::standard()
    }
}

/// Outcome of the authorization check
#[derive(Debug)]
pub enum Decision {
    /// Method known and either public or authenticated
    Allow(AuthenticationResult),
    /// Method unknown; the handler enforces visibility itself
    Deferred(AuthenticationResult),
    Reject(Status),
}

/// Decide whether a request may proceed to its handler.
pub fn authorize(result: AuthenticationResult, method: Option<&str>, public: &PublicMethodSet) -> Decision {
    let Some(method) = method else {
        return Decision::Deferred(result);
    };

    if !result.is_authenticated() && !public.contains(method) {
        return Decision::Reject(Status::unauthenticated(AUTHENTICATION_REQUIRED));
    }

    Decision::Allow(result)
}
