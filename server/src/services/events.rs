//! Event creation and the public catalogue.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use crate::models::{Event, EventCategory, NewEvent, Pricing};
use crate::store::SharedStore;
use crate::utils::error::AppError;

/// Catalogue query. Every field is optional and they combine with AND.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventFilter {
    pub search: Option<String>,
    pub category: Option<EventCategory>,
    #[serde(default)]
    pub upcoming: bool,
}

impl EventFilter {
    pub fn matches(&self, event: &Event, now: DateTime<Utc>) -> bool {
        if self.upcoming && event.start_date <= now {
            return false;
        }
        if let Some(category) = self.category {
            if event.category != category {
                return false;
            }
        }
        match self.search.as_deref().map(str::trim) {
            Some(term) if !term.is_empty() => {
                let term = term.to_lowercase();
                event.title.to_lowercase().contains(&term)
                    || event.description.to_lowercase().contains(&term)
                    || event.tags.iter().any(|t| t.to_lowercase().contains(&term))
            }
            _ => true,
        }
    }
}

fn validate(mut input: NewEvent) -> Result<NewEvent, AppError> {
    input.title = input.title.trim().to_string();
    if input.title.is_empty() {
        return Err(AppError::ValidationError("Title is required".to_string()));
    }
    if input.end_date < input.start_date {
        return Err(AppError::ValidationError(
            "End date must not be before start date".to_string(),
        ));
    }
    if matches!(input.max_attendees, Some(max) if max <= 0) {
        return Err(AppError::ValidationError(
            "Maximum attendees must be a positive number".to_string(),
        ));
    }

    input.location = input
        .location
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty());
    if !input.is_online && input.location.is_none() {
        return Err(AppError::ValidationError(
            "In-person events need a location".to_string(),
        ));
    }

    input.tags = input
        .tags
        .iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect();
    input.tags.dedup();

    Ok(input)
}

fn max_price() -> Decimal {
    Decimal::new(999_999_999_999, 2)
}

fn pricing(input: &NewEvent) -> Result<Pricing, AppError> {
    if input.is_free {
        return Ok(Pricing::Free);
    }

    // Stored as NUMERIC(12, 2): check the rounded value, not the input.
    let amount = match input.price.map(|price| price.round_dp(2)) {
        Some(amount) if amount > Decimal::ZERO && amount <= max_price() => amount,
        Some(amount) if amount > Decimal::ZERO => {
            return Err(AppError::ValidationError(format!(
                "Price cannot exceed {}",
                max_price()
            )))
        }
        _ => {
            return Err(AppError::ValidationError(
                "Paid events need a price of at least 0.01".to_string(),
            ))
        }
    };
    let currency = input
        .currency
        .as_deref()
        .map(str::trim)
        .filter(|c| c.len() == 3 && c.chars().all(|ch| ch.is_ascii_alphabetic()))
        .ok_or_else(|| {
            AppError::ValidationError("Currency must be a three-letter code".to_string())
        })?;

    Ok(Pricing::Paid {
        amount,
        currency: currency.to_ascii_uppercase(),
    })
}

pub struct EventService {
    store: SharedStore,
}

impl EventService {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    pub async fn create_event(&self, organizer_id: Uuid, input: NewEvent) -> Result<Event, AppError> {
        if self.store.get_profile(organizer_id).await?.is_none() {
            return Err(AppError::NotFound("Organizer profile not found".to_string()));
        }

        let input = validate(input)?;
        let pricing = pricing(&input)?;

        let event = Event {
            id: Uuid::new_v4(),
            organizer_id,
            title: input.title,
            description: input.description.trim().to_string(),
            start_date: input.start_date,
            end_date: input.end_date,
            location: input.location,
            is_online: input.is_online,
            category: input.event_type,
            tags: input.tags,
            attendee_count: 0,
            capacity: input.max_attendees,
            pricing,
            registration_enabled: true,
            created_at: Utc::now(),
        };
        self.store.insert_event(&event).await?;

        info!(event_id = %event.id, organizer_id = %organizer_id, "Event created");
        Ok(event)
    }

    pub async fn get(&self, event_id: Uuid) -> Result<Event, AppError> {
        self.store
            .get_event(event_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Event not found".to_string()))
    }

    /// Newest first.
    pub async fn list(&self, filter: &EventFilter) -> Result<Vec<Event>, AppError> {
        let now = Utc::now();
        Ok(self
            .store
            .list_events()
            .await?
            .into_iter()
            .filter(|e| filter.matches(e, now))
            .collect())
    }
}
