use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::services::capacity::can_register;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventCategory {
    Hackathon,
    Meetup,
    Webinar,
}

impl EventCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventCategory::Hackathon => "Hackathon",
            EventCategory::Meetup => "Meetup",
            EventCategory::Webinar => "Webinar",
        }
    }
}

impl fmt::Display for EventCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Hackathon" => Ok(EventCategory::Hackathon),
            "Meetup" => Ok(EventCategory::Meetup),
            "Webinar" => Ok(EventCategory::Webinar),
            other => Err(format!("unknown event category '{}'", other)),
        }
    }
}

/// How an event is priced. Paid events always carry a positive amount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Pricing {
    Free,
    Paid { amount: Decimal, currency: String },
}

impl Pricing {
    pub fn is_free(&self) -> bool {
        matches!(self, Pricing::Free)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: Uuid,
    pub organizer_id: Uuid,
    pub title: String,
    pub description: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub location: Option<String>,
    pub is_online: bool,
    pub category: EventCategory,
    pub tags: Vec<String>,
    pub attendee_count: i32,
    pub capacity: Option<i32>,
    pub pricing: Pricing,
    pub registration_enabled: bool,
    pub created_at: DateTime<Utc>,
}

impl Event {
    /// Registration is accepted only while enabled and before the event starts.
    pub fn accepts_registrations(&self, now: DateTime<Utc>) -> bool {
        self.registration_enabled && self.start_date > now
    }

    pub fn has_room(&self) -> bool {
        can_register(self.attendee_count, self.capacity)
    }
}

/// Fields an organizer submits when creating an event.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewEvent {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub location: Option<String>,
    #[serde(default)]
    pub is_online: bool,
    pub event_type: EventCategory,
    #[serde(default)]
    pub tags: Vec<String>,
    pub max_attendees: Option<i32>,
    #[serde(default = "default_is_free")]
    pub is_free: bool,
    pub price: Option<Decimal>,
    pub currency: Option<String>,
}

fn default_is_free() -> bool {
    true
}

#[derive(Debug, Clone, FromRow)]
pub struct EventRow {
    pub id: Uuid,
    pub organizer_id: Uuid,
    pub title: String,
    pub description: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub location: Option<String>,
    pub is_online: bool,
    pub event_type: String,
    pub tags: Vec<String>,
    pub attendees: i32,
    pub max_attendees: Option<i32>,
    pub is_free: bool,
    pub price: Option<Decimal>,
    pub currency: Option<String>,
    pub registration_enabled: bool,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<EventRow> for Event {
    type Error = String;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        let pricing = if row.is_free {
            Pricing::Free
        } else {
            match (row.price, row.currency) {
                (Some(amount), Some(currency)) => Pricing::Paid { amount, currency },
                _ => return Err(format!("paid event {} has no price", row.id)),
            }
        };

        Ok(Event {
            id: row.id,
            organizer_id: row.organizer_id,
            title: row.title,
            description: row.description,
            start_date: row.start_date,
            end_date: row.end_date,
            location: row.location,
            is_online: row.is_online,
            category: row.event_type.parse()?,
            tags: row.tags,
            attendee_count: row.attendees,
            capacity: row.max_attendees,
            pricing,
            registration_enabled: row.registration_enabled,
            created_at: row.created_at,
        })
    }
}
