//! Public API workloads: REST Countries and the Rick and Morty GraphQL API

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{Scenario, Threshold, VirtualUser, EDGE_CASE, HAPPY};
use crate::error::E2eResult;

pub const REST_COUNTRIES_URL: &str = "https://restcountries.com/v3.1";
pub const RICK_AND_MORTY_URL: &str = "https://rickandmortyapi.com/graphql";

/// `encodeURIComponent("%$#@!")`
const SPECIAL_CHARS: &str = "%25%24%23%40!";

fn is_one_of(status: u16, accepted: &[u16]) -> bool {
    accepted.contains(&status)
}

/// Country lookup by name, plus malformed and partial queries
#[derive(Debug, Clone)]
pub struct RestCountries {
    base_url: String,
    think_time: Duration,
}

impl Default for RestCountries {
    fn default() -> Self {
        Self::new(REST_COUNTRIES_URL)
    }
}

impl RestCountries {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            think_time: Duration::from_secs(1),
        }
    }

    /// Pause after the happy path; edge-case requests pause half as long
    pub fn with_think_time(mut self, think_time: Duration) -> Self {
        self.think_time = think_time;
        self
    }

    fn name_url(&self, query: &str) -> String {
        format!("{}/name/{}", self.base_url, query)
    }
}

#[async_trait]
impl Scenario for RestCountries {
    fn name(&self) -> &str {
        "restcountries"
    }

    fn thresholds(&self) -> Vec<Threshold> {
        vec![
            Threshold::p95_below(HAPPY, 600.0),
            Threshold::failed_rate_below(HAPPY, 0.01),
        ]
    }

    async fn iteration(&self, vu: &mut VirtualUser) -> E2eResult<()> {
        vu.group(HAPPY);
        let res = vu.get(&self.name_url("turkey")).await;
        vu.check("status is 200", res.status == 200);
        vu.check("response is JSON", res.is_json());

        let body = match res.json() {
            Value::Array(items) => items,
            _ => Vec::new(),
        };
        let first = body.first().cloned().unwrap_or(Value::Null);
        vu.check("response is a non-empty array", !body.is_empty());
        vu.check("country has official name", !first["name"]["official"].is_null());
        vu.check("capital field exists and is an array", first["capital"].is_array());
        vu.check("region field exists", !first["region"].is_null());
        vu.check(
            "country is Turkey",
            first["name"]["official"] == json!("Republic of Turkey"),
        );
        vu.think(self.think_time).await;

        vu.group(EDGE_CASE);
        let pause = self.think_time / 2;

        let invalid = vu.get(&self.name_url("thisCountryDoesNotExist123456")).await;
        vu.check("invalid country returns 404 or 200", is_one_of(invalid.status, &[404, 200]));
        if invalid.status == 200 {
            let empty = invalid.json().as_array().map(Vec::is_empty).unwrap_or(false);
            vu.check("empty array for invalid country", empty);
        }
        vu.think(pause).await;

        let partial = vu.get(&self.name_url("tur")).await;
        vu.check("partial search returns 200", partial.status == 200);
        vu.check(
            "partial search returns multiple results",
            partial.json().as_array().map(|a| a.len() >= 2).unwrap_or(false),
        );
        vu.think(pause).await;

        let numeric = vu.get(&self.name_url("12345")).await;
        vu.check("numeric query handled gracefully", is_one_of(numeric.status, &[404, 200]));
        vu.think(pause).await;

        let special = vu.get(&self.name_url(SPECIAL_CHARS)).await;
        vu.check("special chars do not crash API", is_one_of(special.status, &[404, 200]));
        vu.think(pause).await;

        let empty = vu.get(&self.name_url("")).await;
        vu.check(
            "empty query returns valid status (400|404|200)",
            is_one_of(empty.status, &[400, 404, 200]),
        );
        Ok(())
    }
}

/// Character lookup over GraphQL, plus an unknown id and an unknown field
#[derive(Debug, Clone)]
pub struct RickAndMortyGraphql {
    url: String,
    think_time: Duration,
}

impl Default for RickAndMortyGraphql {
    fn default() -> Self {
        Self::new(RICK_AND_MORTY_URL)
    }
}

const CHARACTER_QUERY: &str = r#"
query {
  character(id: 1) {
    id
    name
    status
    species
    origin {
      name
    }
  }
}"#;

const MISSING_CHARACTER_QUERY: &str = r#"
query {
  character(id: 9999999) {
    id
    name
  }
}"#;

const UNKNOWN_FIELD_QUERY: &str = r#"
query {
  character(id: 1) {
    id
    unknownFieldXYZ
  }
}"#;

impl RickAndMortyGraphql {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            think_time: Duration::from_secs(1),
        }
    }

    pub fn with_think_time(mut self, think_time: Duration) -> Self {
        self.think_time = think_time;
        self
    }
}

#[async_trait]
impl Scenario for RickAndMortyGraphql {
    fn name(&self) -> &str {
        "rickmorty-characters"
    }

    fn thresholds(&self) -> Vec<Threshold> {
        vec![
            Threshold::p95_below(HAPPY, 800.0),
            Threshold::failed_rate_below(HAPPY, 0.01),
        ]
    }

    async fn iteration(&self, vu: &mut VirtualUser) -> E2eResult<()> {
        vu.group(HAPPY);
        let res = vu.post_json(&self.url, &json!({ "query": CHARACTER_QUERY })).await;
        vu.check("status is 200", res.status == 200);
        vu.check("response is JSON", res.is_json());

        let body = res.json();
        let character = &body["data"]["character"];
        vu.check("no GraphQL errors", body["errors"].is_null());
        vu.check("character data exists", character.is_object());
        vu.check("character id is 1", character["id"] == json!("1"));
        vu.check("name is Rick Sanchez", character["name"] == json!("Rick Sanchez"));
        vu.check("origin name exists", !character["origin"]["name"].is_null());
        vu.think(self.think_time).await;

        vu.group(EDGE_CASE);
        let pause = self.think_time / 2;

        let missing = vu
            .post_json(&self.url, &json!({ "query": MISSING_CHARACTER_QUERY }))
            .await;
        vu.check("invalid id returns 200", missing.status == 200);
        let missing_body = missing.json();
        let data = &missing_body["data"];
        vu.check(
            "invalid returns null or error",
            (data.is_object() && data["character"].is_null()) || !missing_body["errors"].is_null(),
        );
        vu.think(pause).await;

        let bad_field = vu
            .post_json(&self.url, &json!({ "query": UNKNOWN_FIELD_QUERY }))
            .await;
        vu.check(
            "invalid field returns 200 or 400",
            is_one_of(bad_field.status, &[200, 400]),
        );
        vu.check(
            "invalid field produces GraphQL errors",
            bad_field.json()["errors"]
                .as_array()
                .map(|e| !e.is_empty())
                .unwrap_or(false),
        );
        vu.think(pause).await;
        Ok(())
    }
}
