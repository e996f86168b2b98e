// libs/specialist-cell/src/store.rs
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Method;
use serde_json::{json, Value};
use tracing::debug;
use uuid::Uuid;

use shared_database::SupabaseClient;

use crate::models::{AvailabilityError, AvailabilityRule};

/// Persistence boundary for availability rules. Rules are written only
/// through the AvailabilityService so the resolver's input invariants hold.
#[async_trait]
pub trait AvailabilityStore: Send + Sync {
    async fn insert_rule(&self, rule: &AvailabilityRule) -> Result<(), AvailabilityError>;
    async fn rules_for_specialist(
        &self,
        specialist_id: Uuid,
    ) -> Result<Vec<AvailabilityRule>, AvailabilityError>;
    async fn get_rule(&self, rule_id: Uuid) -> Result<AvailabilityRule, AvailabilityError>;
    async fn set_rule_active(
        &self,
        rule_id: Uuid,
        active: bool,
        actor: Uuid,
    ) -> Result<AvailabilityRule, AvailabilityError>;
}

// ==============================================================================
// POSTGREST-BACKED STORE
// ==============================================================================

pub struct SupabaseAvailabilityStore {
    supabase: Arc<SupabaseClient>,
}

impl SupabaseAvailabilityStore {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    fn parse_rules(result: Vec<Value>) -> Result<Vec<AvailabilityRule>, AvailabilityError> {
        result
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<AvailabilityRule>, _>>()
            .map_err(|e| {
                AvailabilityError::Storage(format!("Failed to parse availability rules: {}", e))
            })
    }
}

#[async_trait]
impl AvailabilityStore for SupabaseAvailabilityStore {
    async fn insert_rule(&self, rule: &AvailabilityRule) -> Result<(), AvailabilityError> {
        let rule_data = json!({
            "id": rule.id,
            "specialist_id": rule.specialist_id,
            "day_of_week": rule.day_of_week,
            "start_time": rule.start_time.map(|t| t.format("%H:%M:%S").to_string()),
            "end_time": rule.end_time.map(|t| t.format("%H:%M:%S").to_string()),
            "exception_date": rule.exception_date,
            "is_active": rule.is_active,
            "created_at": rule.created_at.to_rfc3339(),
            "updated_at": rule.updated_at.to_rfc3339(),
            "created_by": rule.created_by,
            "updated_by": rule.updated_by,
        });

        let _: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::POST,
                "/rest/v1/availability_blocks",
                Some(rule_data),
                Some(representation_headers()),
            )
            .await
            .map_err(|e| AvailabilityError::Storage(e.to_string()))?;

        debug!("Availability rule {} stored", rule.id);
        Ok(())
    }

    async fn rules_for_specialist(
        &self,
        specialist_id: Uuid,
    ) -> Result<Vec<AvailabilityRule>, AvailabilityError> {
        let path = format!(
            "/rest/v1/availability_blocks?specialist_id=eq.{}&order=day_of_week.asc,start_time.asc",
            specialist_id
        );

        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, None)
            .await
            .map_err(|e| AvailabilityError::Storage(e.to_string()))?;

        Self::parse_rules(result)
    }

    async fn get_rule(&self, rule_id: Uuid) -> Result<AvailabilityRule, AvailabilityError> {
        let path = format!("/rest/v1/availability_blocks?id=eq.{}", rule_id);

        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, None)
            .await
            .map_err(|e| AvailabilityError::Storage(e.to_string()))?;

        let mut rules = Self::parse_rules(result)?;
        if rules.is_empty() {
            return Err(AvailabilityError::RuleNotFound);
        }
        Ok(rules.remove(0))
    }

    async fn set_rule_active(
        &self,
        rule_id: Uuid,
        active: bool,
        actor: Uuid,
    ) -> Result<AvailabilityRule, AvailabilityError> {
        let path = format!("/rest/v1/availability_blocks?id=eq.{}", rule_id);
        let update_data = json!({
            "is_active": active,
            "updated_at": Utc::now().to_rfc3339(),
            "updated_by": actor,
        });

        let result: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::PATCH,
                &path,
                Some(update_data),
                Some(representation_headers()),
            )
            .await
            .map_err(|e| AvailabilityError::Storage(e.to_string()))?;

        let mut rules = Self::parse_rules(result)?;
        if rules.is_empty() {
            return Err(AvailabilityError::RuleNotFound);
        }
        Ok(rules.remove(0))
    }
}

fn representation_headers() -> reqwest::header::HeaderMap {
    let mut headers = reqwest::header::HeaderMap::new();
    headers.insert(
        "Prefer",
        reqwest::header::HeaderValue::from_static("return=representation"),
    );
    headers
}

// ==============================================================================
// IN-MEMORY STORE
// ==============================================================================

/// Process-local store used by tests and local development.
#[derive(Default)]
pub struct MemoryAvailabilityStore {
    rules: Mutex<HashMap<Uuid, AvailabilityRule>>,
}

impl MemoryAvailabilityStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AvailabilityStore for MemoryAvailabilityStore {
    async fn insert_rule(&self, rule: &AvailabilityRule) -> Result<(), AvailabilityError> {
        self.rules
            .lock()
            .unwrap()
            .insert(rule.id, rule.clone());
        Ok(())
    }

    async fn rules_for_specialist(
        &self,
        specialist_id: Uuid,
    ) -> Result<Vec<AvailabilityRule>, AvailabilityError> {
        let rules = self.rules.lock().unwrap();
        let mut matching: Vec<AvailabilityRule> = rules
            .values()
            .filter(|r| r.specialist_id == specialist_id)
            .cloned()
            .collect();
        matching.sort_by_key(|r| (r.day_of_week, r.start_time));
        Ok(matching)
    }

    async fn get_rule(&self, rule_id: Uuid) -> Result<AvailabilityRule, AvailabilityError> {
        self.rules
            .lock()
            .unwrap()
            .get(&rule_id)
            .cloned()
            .ok_or(AvailabilityError::RuleNotFound)
    }

    async fn set_rule_active(
        &self,
        rule_id: Uuid,
        active: bool,
        actor: Uuid,
    ) -> Result<AvailabilityRule, AvailabilityError> {
        let mut rules = self.rules.lock().unwrap();
        let rule = rules
            .get_mut(&rule_id)
            .ok_or(AvailabilityError::RuleNotFound)?;
        rule.is_active = active;
        rule.updated_at = Utc::now();
        rule.updated_by = Some(actor);
        Ok(rule.clone())
    }
}
