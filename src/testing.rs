//! In-memory stand-in for the site API.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Mutex;

use crate::client::{Fetch, JsonResponse};

type Handler = Box<dyn Fn(&str, &[(&str, String)]) -> JsonResponse + Send + Sync>;

pub struct FakeSite {
    handler: Handler,
    calls: Mutex<Vec<String>>,
}

impl FakeSite {
    pub fn new(handler: impl Fn(&str, &[(&str, String)]) -> JsonResponse + Send + Sync + 'static) -> Self {
        Self {
            handler: Box::new(handler),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Every request seen so far, rendered as `path?k=v&k=v`.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, path: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.split('?').next() == Some(path))
            .count()
    }
}

pub fn param<'a>(params: &'a [(&str, String)], key: &str) -> Option<&'a str> {
    params
        .iter()
        .find(|(k, _)| *k == key)
        .map(|(_, v)| v.as_str())
}

#[async_trait]
impl Fetch for FakeSite {
    async fn get_json(&self, path: &str, params: &[(&str, String)]) -> Result<JsonResponse> {
        let query = params
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");
        self.calls.lock().unwrap().push(format!("{path}?{query}"));
        Ok((self.handler)(path, params))
    }
}
