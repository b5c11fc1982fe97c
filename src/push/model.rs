use serde::{Deserialize, Serialize};

#[derive(Serialize, Debug)]
pub struct PushMessage<'a> {
    pub to: &'a str,
    pub notification: PushNotification<'a>,
}

#[derive(Serialize, Debug)]
pub struct PushNotification<'a> {
    pub title: &'a str,
    pub body: &'a str,
}

/// Reply body of the push endpoint. Every field is optional in practice.
#[derive(Deserialize, Debug, Default)]
pub struct PushResponse {
    #[serde(default)]
    pub failure: u32,
    #[serde(default)]
    pub results: Vec<PushResult>,
}

#[derive(Deserialize, Debug, Default)]
pub struct PushResult {
    pub message_id: Option<String>,
    pub error: Option<String>,
}
