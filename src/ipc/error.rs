use serde_json::json;

/// Stable error taxonomy exposed on the wire. Clients key remediation off
/// the code, so `not_found` and `forbidden` must stay distinguishable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrCode {
    BadParams,
    NotFound,
    Conflict,
    Forbidden,
    CapacityExceeded,
    InvalidState,
    Internal,
    NoWorkspace,
    NotImplemented,
}

impl ErrCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrCode::BadParams => "bad_params",
            ErrCode::NotFound => "not_found",
            ErrCode::Conflict => "conflict",
            ErrCode::Forbidden => "forbidden",
            ErrCode::CapacityExceeded => "capacity_exceeded",
            ErrCode::InvalidState => "invalid_state",
            ErrCode::Internal => "internal",
            ErrCode::NoWorkspace => "no_workspace",
            ErrCode::NotImplemented => "not_implemented",
        }
    }
}

#[derive(Debug)]
pub struct HandlerErr {
    pub code: ErrCode,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn new(code: ErrCode, message: impl Into<String>) -> Self {
        HandlerErr {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        Self::new(ErrCode::BadParams, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrCode::NotFound, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrCode::Conflict, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrCode::Forbidden, message)
    }

    pub fn capacity_exceeded(message: impl Into<String>) -> Self {
        Self::new(ErrCode::CapacityExceeded, message)
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::new(ErrCode::InvalidState, message)
    }

    pub fn internal(e: impl ToString) -> Self {
        Self::new(ErrCode::Internal, e.to_string())
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code.as_str(), self.message, self.details)
    }
}

impl From<rusqlite::Error> for HandlerErr {
    fn from(e: rusqlite::Error) -> Self {
        HandlerErr::internal(e)
    }
}

pub fn ok(id: &str, result: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "ok": true,
        "result": result
    })
}

pub fn err(
    id: &str,
    code: &str,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> serde_json::Value {
    let mut error = json!({
        "code": code,
        "message": message.into(),
    });
    if let Some(d) = details {
        error["details"] = d;
    }
    json!({
        "id": id,
        "ok": false,
        "error": error,
    })
}
