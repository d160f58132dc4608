//! A sellable product in the point-of-sale catalog.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A catalog entry, optionally illustrated by an image held by the media host.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Product {
    /// Internal identifier.
    pub id: Uuid,

    /// Display name shown at the register.
    pub name: String,

    /// Scannable barcode (EAN/UPC or store-issued); unique when present.
    pub barcode: Option<String>,

    /// Unit price in the smallest currency unit.
    pub price_cents: i64,

    /// Units on hand.
    pub stock: i64,

    pub category: Option<String>,

    /// Secure URL of the product image on the media host.
    pub image_url: Option<String>,

    /// Media host public identifier, needed to destroy the image later.
    pub image_id: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
