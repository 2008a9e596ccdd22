//! Long-lived per-user travel preference profiles
//!
//! Profiles are updated field-by-field through a small key vocabulary or by
//! merging whole preference records learned from a session. The store keeps
//! an optional JSON snapshot that is rewritten after every mutation; loading
//! it is best-effort and per-profile.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{error, info, warn};

use crate::error::{Result, VoyageError};
use crate::memory::types::SessionPreferences;
use crate::storage::{load_snapshot, save_snapshot};

const NO_PROFILE_CONTEXT: &str = "用户无历史偏好信息";
const EMPTY_PREFERENCES: &str = "暂无偏好信息";

/// Structured travel preferences
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserPreference {
    pub budget_min: Option<u32>,
    pub budget_max: Option<u32>,
    pub budget_explanation: Option<String>,

    pub duration_days: Option<u32>,
    /// e.g. short trip / long trip
    pub duration_preference: Option<String>,

    pub favorite_regions: Vec<String>,
    pub favorite_cities: Vec<String>,
    pub avoided_cities: Vec<String>,

    pub preferred_seasons: Vec<String>,
    /// e.g. holidays / weekdays
    pub travel_time_preference: Option<String>,

    /// solo / couple / family / friends
    pub travel_companion: Option<String>,
    pub companion_notes: Option<String>,

    pub travel_style: Option<String>,
    pub pace_preference: Option<String>,

    pub interest_tags: Vec<String>,
    pub interest_weights: BTreeMap<String, f32>,

    pub dietary_restrictions: Vec<String>,
    pub food_preferences: Vec<String>,
    pub cuisine_types: Vec<String>,

    pub accommodation_type: Option<String>,
    pub accommodation_level: Option<String>,

    pub transport_preference: Option<String>,
    pub transport_notes: Option<String>,
}

fn union(a: &[String], b: &[String]) -> Vec<String> {
    let mut merged: Vec<String> = a.iter().chain(b).cloned().collect();
    merged.sort();
    merged.dedup();
    merged
}

fn widen(a: Option<u32>, b: Option<u32>, pick: fn(u32, u32) -> u32) -> Option<u32> {
    match (a, b) {
        (Some(x), Some(y)) => Some(pick(x, y)),
        (x, y) => x.or(y),
    }
}

impl UserPreference {
    /// Combine two records without mutating either
    ///
    /// Budget bounds widen to cover both, list fields become the sorted
    /// de-duplicated union, and scalar fields take `other`'s value when set.
    pub fn merge(&self, other: &UserPreference) -> UserPreference {
        let mut interest_weights = self.interest_weights.clone();
        interest_weights.extend(other.interest_weights.iter().map(|(k, v)| (k.clone(), *v)));

        UserPreference {
            budget_min: widen(self.budget_min, other.budget_min, u32::min),
            budget_max: widen(self.budget_max, other.budget_max, u32::max),
            budget_explanation: other.budget_explanation.clone().or_else(|| self.budget_explanation.clone()),
            duration_days: other.duration_days.or(self.duration_days),
            duration_preference: other.duration_preference.clone().or_else(|| self.duration_preference.clone()),
            favorite_regions: union(&self.favorite_regions, &other.favorite_regions),
            favorite_cities: union(&self.favorite_cities, &other.favorite_cities),
            avoided_cities: union(&self.avoided_cities, &other.avoided_cities),
            preferred_seasons: union(&self.preferred_seasons, &other.preferred_seasons),
            travel_time_preference: other.travel_time_preference.clone().or_else(|| self.travel_time_preference.clone()),
            travel_companion: other.travel_companion.clone().or_else(|| self.travel_companion.clone()),
            companion_notes: other.companion_notes.clone().or_else(|| self.companion_notes.clone()),
            travel_style: other.travel_style.clone().or_else(|| self.travel_style.clone()),
            pace_preference: other.pace_preference.clone().or_else(|| self.pace_preference.clone()),
            interest_tags: union(&self.interest_tags, &other.interest_tags),
            interest_weights,
            dietary_restrictions: union(&self.dietary_restrictions, &other.dietary_restrictions),
            food_preferences: union(&self.food_preferences, &other.food_preferences),
            cuisine_types: union(&self.cuisine_types, &other.cuisine_types),
            accommodation_type: other.accommodation_type.clone().or_else(|| self.accommodation_type.clone()),
            accommodation_level: other.accommodation_level.clone().or_else(|| self.accommodation_level.clone()),
            transport_preference: other.transport_preference.clone().or_else(|| self.transport_preference.clone()),
            transport_notes: other.transport_notes.clone().or_else(|| self.transport_notes.clone()),
        }
    }

    /// One-line digest
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();
        if let Some(budget) = self.budget_line() {
            parts.push(budget);
        }
        if let Some(days) = self.duration_days {
            parts.push(format!("天数: {days}天"));
        }
        if !self.favorite_cities.is_empty() {
            parts.push(format!("偏好城市: {}", top3(&self.favorite_cities)));
        }
        if !self.interest_tags.is_empty() {
            parts.push(format!("兴趣: {}", top3(&self.interest_tags)));
        }

        if parts.is_empty() {
            EMPTY_PREFERENCES.to_string()
        } else {
            parts.join(" | ")
        }
    }

    fn budget_line(&self) -> Option<String> {
        match (self.budget_min, self.budget_max) {
            (Some(min), Some(max)) if min == max => Some(format!("预算: {min}元")),
            (Some(min), Some(max)) => Some(format!("预算: {min}-{max}元")),
            (Some(min), None) => Some(format!("预算 ≥ {min}元")),
            (None, Some(max)) => Some(format!("预算 ≤ {max}元")),
            (None, None) => None,
        }
    }

    /// Apply a single keyed update; `false` on a value of the wrong shape
    fn apply(&mut self, field: PreferenceField, value: &Value) -> bool {
        match field {
            PreferenceField::BudgetMin => set_number(&mut self.budget_min, value),
            PreferenceField::BudgetMax => set_number(&mut self.budget_max, value),
            PreferenceField::DurationDays => set_number(&mut self.duration_days, value),
            PreferenceField::BudgetExplanation => set_text(&mut self.budget_explanation, value),
            PreferenceField::TravelCompanion => set_text(&mut self.travel_companion, value),
            PreferenceField::TravelStyle => set_text(&mut self.travel_style, value),
            PreferenceField::PacePreference => set_text(&mut self.pace_preference, value),
            PreferenceField::AccommodationType => set_text(&mut self.accommodation_type, value),
            PreferenceField::TransportPreference => set_text(&mut self.transport_preference, value),
            PreferenceField::FavoriteCities => append(&mut self.favorite_cities, value),
            PreferenceField::AvoidedCities => append(&mut self.avoided_cities, value),
            PreferenceField::FavoriteRegions => append(&mut self.favorite_regions, value),
            PreferenceField::PreferredSeasons => append(&mut self.preferred_seasons, value),
            PreferenceField::InterestTags => append(&mut self.interest_tags, value),
            PreferenceField::DietaryRestrictions => append(&mut self.dietary_restrictions, value),
            PreferenceField::FoodPreferences => append(&mut self.food_preferences, value),
        }
    }
}

impl From<&SessionPreferences> for UserPreference {
    fn from(session: &SessionPreferences) -> Self {
        UserPreference {
            budget_min: session.budget,
            budget_max: session.budget,
            duration_days: session.travel_days,
            favorite_cities: union(&session.preferred_cities, &[]),
            interest_tags: union(&session.interest_tags, &[]),
            ..UserPreference::default()
        }
    }
}

fn top3(list: &[String]) -> String {
    list.iter().take(3).cloned().collect::<Vec<_>>().join(", ")
}

fn set_number(slot: &mut Option<u32>, value: &Value) -> bool {
    match value {
        Value::Null => {
            *slot = None;
            true
        }
        Value::Number(n) => match n.as_u64().and_then(|v| u32::try_from(v).ok()) {
            Some(v) => {
                *slot = Some(v);
                true
            }
            None => false,
        },
        _ => false,
    }
}

fn set_text(slot: &mut Option<String>, value: &Value) -> bool {
    match value {
        Value::Null => {
            *slot = None;
            true
        }
        Value::String(s) => {
            *slot = Some(s.clone());
            true
        }
        _ => false,
    }
}

fn append(list: &mut Vec<String>, value: &Value) -> bool {
    let additions: Vec<String> = match value {
        Value::String(s) => vec![s.clone()],
        Value::Array(items) => {
            let strings: Option<Vec<String>> =
                items.iter().map(|v| v.as_str().map(str::to_string)).collect();
            match strings {
                Some(strings) => strings,
                None => return false,
            }
        }
        _ => return false,
    };
    *list = union(list, &additions);
    true
}

/// Internal attribute targeted by an external field key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PreferenceField {
    BudgetMin,
    BudgetMax,
    BudgetExplanation,
    DurationDays,
    FavoriteCities,
    AvoidedCities,
    FavoriteRegions,
    PreferredSeasons,
    TravelCompanion,
    TravelStyle,
    PacePreference,
    InterestTags,
    DietaryRestrictions,
    FoodPreferences,
    AccommodationType,
    TransportPreference,
}

impl PreferenceField {
    fn from_key(key: &str) -> Option<Self> {
        let field = match key {
            "budget_min" => PreferenceField::BudgetMin,
            "budget_max" => PreferenceField::BudgetMax,
            "budget" => PreferenceField::BudgetExplanation,
            "duration" | "days" => PreferenceField::DurationDays,
            "city" | "cities" => PreferenceField::FavoriteCities,
            "avoid" => PreferenceField::AvoidedCities,
            "region" => PreferenceField::FavoriteRegions,
            "season" => PreferenceField::PreferredSeasons,
            "companion" => PreferenceField::TravelCompanion,
            "style" => PreferenceField::TravelStyle,
            "pace" => PreferenceField::PacePreference,
            "interest" => PreferenceField::InterestTags,
            "diet" => PreferenceField::DietaryRestrictions,
            "food" => PreferenceField::FoodPreferences,
            "accommodation" => PreferenceField::AccommodationType,
            "transport" => PreferenceField::TransportPreference,
            _ => return None,
        };
        Some(field)
    }
}

/// A completed trip
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TravelHistory {
    pub session_id: String,
    pub destination: String,
    pub duration_days: u32,
    #[serde(default)]
    pub budget: Option<String>,
    /// 1 to 5
    #[serde(default)]
    pub rating: Option<u8>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl TravelHistory {
    pub fn new(session_id: impl Into<String>, destination: impl Into<String>, duration_days: u32) -> Self {
        Self {
            session_id: session_id.into(),
            destination: destination.into(),
            duration_days,
            budget: None,
            rating: None,
            notes: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_rating(mut self, rating: u8) -> Self {
        self.rating = Some(rating);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: String,
    #[serde(default)]
    pub preferences: UserPreference,
    #[serde(default)]
    pub travel_history: Vec<TravelHistory>,
    #[serde(default)]
    pub interaction_count: u64,
    pub last_interaction: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    /// Starts at 1, never decreases
    #[serde(default = "initial_version")]
    pub profile_version: u64,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

fn initial_version() -> u64 {
    1
}

impl UserProfile {
    pub fn new(user_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            user_id: user_id.into(),
            preferences: UserPreference::default(),
            travel_history: Vec::new(),
            interaction_count: 0,
            last_interaction: now,
            created_at: now,
            profile_version: initial_version(),
            metadata: BTreeMap::new(),
        }
    }

    fn record_interaction(&mut self) {
        self.interaction_count += 1;
        self.profile_version += 1;
        self.last_interaction = Utc::now();
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProfileStats {
    pub total_users: usize,
    pub total_interactions: u64,
    pub total_travel_history: usize,
    pub avg_interactions_per_user: f64,
}

/// Per-user preference profiles with optional JSON persistence
#[derive(Debug, Default)]
pub struct UserProfileStore {
    profiles: BTreeMap<String, UserProfile>,
    storage_path: Option<PathBuf>,
    load_errors: Vec<String>,
}

impl UserProfileStore {
    /// In-memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Store backed by a snapshot file, loaded best-effort
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let mut store = Self {
            storage_path: Some(path.into()),
            ..Self::default()
        };
        store.load();
        store
    }

    /// Problems found while loading; affected profiles were skipped
    pub fn load_errors(&self) -> &[String] {
        &self.load_errors
    }

    pub fn get_or_create(&mut self, user_id: &str) -> &UserProfile {
        if !self.profiles.contains_key(user_id) {
            info!("Creating profile for user {}", user_id);
            self.profiles.insert(user_id.to_string(), UserProfile::new(user_id));
            self.save();
        }
        &self.profiles[user_id]
    }

    pub fn get(&self, user_id: &str) -> Option<&UserProfile> {
        self.profiles.get(user_id)
    }

    pub fn delete(&mut self, user_id: &str) -> bool {
        if self.profiles.remove(user_id).is_some() {
            self.save();
            true
        } else {
            false
        }
    }

    /// Update one preference by external key
    ///
    /// Returns `false` for an unknown user, an unknown key or a value of the
    /// wrong type; the profile is left untouched in each case.
    pub fn update_preference(&mut self, user_id: &str, key: &str, value: Value) -> bool {
        let Some(field) = PreferenceField::from_key(key) else {
            warn!("Unknown preference key: {}", key);
            return false;
        };
        let Some(profile) = self.profiles.get_mut(user_id) else {
            return false;
        };

        let mut updated = profile.preferences.clone();
        if !updated.apply(field, &value) {
            warn!("Rejected value for preference {}: {}", key, value);
            return false;
        }

        profile.preferences = updated;
        profile.record_interaction();
        self.save();
        true
    }

    /// Merge a preference record into the user's profile
    pub fn merge_preferences(&mut self, user_id: &str, preferences: &UserPreference) -> bool {
        let Some(profile) = self.profiles.get_mut(user_id) else {
            return false;
        };
        profile.preferences = profile.preferences.merge(preferences);
        profile.record_interaction();
        self.save();
        true
    }

    /// Record a trip; its destination joins the favorite cities
    pub fn add_travel_history(&mut self, user_id: &str, history: TravelHistory) -> bool {
        if let Some(rating) = history.rating.filter(|r| !(1..=5).contains(r)) {
            warn!("Rejected travel history with rating {}", rating);
            return false;
        }
        let Some(profile) = self.profiles.get_mut(user_id) else {
            return false;
        };

        if !history.destination.is_empty() {
            let prefs = &mut profile.preferences;
            prefs.favorite_cities = union(&prefs.favorite_cities, &[history.destination.clone()]);
        }
        profile.travel_history.push(history);
        profile.record_interaction();
        self.save();
        true
    }

    pub fn get_preferences(&self, user_id: &str) -> Option<UserPreference> {
        self.profiles.get(user_id).map(|p| p.preferences.clone())
    }

    /// Most recent `limit` trips, oldest first
    pub fn get_travel_history(&self, user_id: &str, limit: usize) -> Vec<TravelHistory> {
        self.profiles
            .get(user_id)
            .map(|p| {
                let skip = p.travel_history.len().saturating_sub(limit);
                p.travel_history[skip..].to_vec()
            })
            .unwrap_or_default()
    }

    /// Preference digest for prompt injection
    pub fn get_context_for_llm(&self, user_id: &str) -> String {
        let Some(profile) = self.profiles.get(user_id) else {
            return NO_PROFILE_CONTEXT.to_string();
        };
        let prefs = &profile.preferences;

        let mut lines = vec!["【用户偏好】".to_string()];
        if let Some(budget) = prefs.budget_line() {
            lines.push(budget);
        }
        if let Some(days) = prefs.duration_days {
            lines.push(format!("偏好天数: {days}天"));
        }
        if !prefs.favorite_cities.is_empty() {
            lines.push(format!("偏好城市: {}", top3(&prefs.favorite_cities)));
        }
        if !prefs.interest_tags.is_empty() {
            lines.push(format!("兴趣标签: {}", top3(&prefs.interest_tags)));
        }
        if let Some(style) = &prefs.travel_style {
            lines.push(format!("旅行风格: {style}"));
        }
        if let Some(companion) = &prefs.travel_companion {
            lines.push(format!("出行同伴: {companion}"));
        }
        if lines.len() == 1 {
            lines.push(EMPTY_PREFERENCES.to_string());
        }
        lines.join("\n")
    }

    pub fn user_ids(&self) -> Vec<String> {
        self.profiles.keys().cloned().collect()
    }

    pub fn stats(&self) -> ProfileStats {
        let total_users = self.profiles.len();
        let total_interactions: u64 = self.profiles.values().map(|p| p.interaction_count).sum();
        let total_travel_history = self.profiles.values().map(|p| p.travel_history.len()).sum();
        ProfileStats {
            total_users,
            total_interactions,
            total_travel_history,
            avg_interactions_per_user: total_interactions as f64 / total_users.max(1) as f64,
        }
    }

    pub fn export_profile(&self, user_id: &str) -> Option<Value> {
        self.profiles
            .get(user_id)
            .and_then(|p| serde_json::to_value(p).ok())
    }

    /// Insert or replace a profile from exported JSON
    pub fn import_profile(&mut self, data: Value) -> Result<String> {
        let profile: UserProfile = serde_json::from_value(data)
            .map_err(|e| VoyageError::Serialization(format!("Invalid profile: {e}")))?;
        if profile.user_id.is_empty() {
            return Err(VoyageError::Memory("Profile has no user_id".to_string()));
        }
        let user_id = profile.user_id.clone();
        self.profiles.insert(user_id.clone(), profile);
        self.save();
        Ok(user_id)
    }

    fn save(&self) {
        let Some(path) = &self.storage_path else {
            return;
        };
        if let Err(e) = save_snapshot(path, &self.profiles) {
            error!("Failed to save user profiles: {}", e);
        }
    }

    fn load(&mut self) {
        let Some(path) = self.storage_path.clone() else {
            return;
        };

        let raw: BTreeMap<String, Value> = match load_snapshot(&path) {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                info!("No profile snapshot at {}, starting empty", path.display());
                return;
            }
            Err(e) => {
                error!("Failed to load user profiles: {}", e);
                self.load_errors.push(e.to_string());
                return;
            }
        };

        for (user_id, value) in raw {
            match serde_json::from_value::<UserProfile>(value) {
                Ok(profile) => {
                    self.profiles.insert(user_id, profile);
                }
                Err(e) => {
                    warn!("Skipping unreadable profile {}: {}", user_id, e);
                    self.load_errors.push(format!("{user_id}: {e}"));
                }
            }
        }
        info!("Loaded {} user profiles", self.profiles.len());
    }
}
