//! src/services/product_service.rs
//!
//! ProductService: catalog records in SQLite. Products reference their image
//! on the media host by URL and public id; the bytes never live here.

use crate::models::{product::Product, upload::RemoteAsset};
use chrono::Utc;
use sqlx::SqlitePool;
use std::{collections::HashMap, sync::Arc};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

const PRODUCT_COLUMNS: &str = "id, name, barcode, price_cents, stock, category, \
                               image_url, image_id, created_at, updated_at";
const MAX_NAME_LEN: usize = 200;
const MAX_BARCODE_LEN: usize = 64;
const MAX_UPDATE_ATTEMPTS: usize = 5;

#[derive(Debug, Error)]
pub enum ProductError {
    #[error("product `{0}` not found")]
    NotFound(String),
    #[error("barcode `{0}` is already assigned to another product")]
    DuplicateBarcode(String),
    #[error("{0}")]
    InvalidInput(String),
    #[error("product `{0}` is being modified concurrently; try again")]
    Conflict(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type ProductResult<T> = Result<T, ProductError>;

/// Fields for a new product, parsed from a submitted form.
#[derive(Debug, Clone)]
pub struct NewProduct {
    pub name: String,
    pub barcode: Option<String>,
    pub price_cents: i64,
    pub stock: i64,
    pub category: Option<String>,
    pub image: Option<RemoteAsset>,
}

impl NewProduct {
    pub fn from_form(
        fields: &HashMap<String, String>,
        image: Option<RemoteAsset>,
    ) -> ProductResult<Self> {
        let name = field(fields, "name")
            .ok_or_else(|| ProductError::InvalidInput("name is required".into()))?;
        let price = field(fields, "price")
            .ok_or_else(|| ProductError::InvalidInput("price is required".into()))?;

        Ok(Self {
            name: check_name(name)?,
            barcode: field(fields, "barcode").map(check_barcode).transpose()?,
            price_cents: parse_price(price)?,
            stock: field(fields, "stock").map(parse_stock).transpose()?.unwrap_or(0),
            category: field(fields, "category").map(str::to_string),
            image,
        })
    }
}

/// Partial update; `None` leaves the stored value untouched.
#[derive(Debug, Clone, Default)]
pub struct ProductUpdate {
    pub name: Option<String>,
    pub barcode: Option<String>,
    pub price_cents: Option<i64>,
    pub stock: Option<i64>,
    pub category: Option<String>,
    pub image: Option<RemoteAsset>,
}

impl ProductUpdate {
    pub fn from_form(
        fields: &HashMap<String, String>,
        image: Option<RemoteAsset>,
    ) -> ProductResult<Self> {
        Ok(Self {
            name: field(fields, "name").map(check_name).transpose()?,
            barcode: field(fields, "barcode").map(check_barcode).transpose()?,
            price_cents: field(fields, "price").map(parse_price).transpose()?,
            stock: field(fields, "stock").map(parse_stock).transpose()?,
            category: field(fields, "category").map(str::to_string),
            image,
        })
    }
}

#[derive(Clone)]
pub struct ProductService {
    /// Shared SQLite connection pool.
    pub db: Arc<SqlitePool>,
}

impl ProductService {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    pub async fn create(&self, new: NewProduct) -> ProductResult<Product> {
        let now = Utc::now();
        let (image_url, image_id) = split_image(new.image);

        sqlx::query_as::<_, Product>(&format!(
            "INSERT INTO products (id, name, barcode, price_cents, stock, category,
                                   image_url, image_id, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             RETURNING {PRODUCT_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(&new.name)
        .bind(&new.barcode)
        .bind(new.price_cents)
        .bind(new.stock)
        .bind(&new.category)
        .bind(image_url)
        .bind(image_id)
        .bind(now)
        .bind(now)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| barcode_conflict(err, new.barcode.as_deref()))
    }

    /// All products, newest first.
    pub async fn list(&self) -> ProductResult<Vec<Product>> {
        let rows = sqlx::query_as::<_, Product>(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products ORDER BY created_at DESC"
        ))
        .fetch_all(&*self.db)
        .await?;
        Ok(rows)
    }

    pub async fn get(&self, id: Uuid) -> ProductResult<Product> {
        sqlx::query_as::<_, Product>(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&*self.db)
        .await?
        .ok_or_else(|| ProductError::NotFound(id.to_string()))
    }

    /// Lookup used by the register when a barcode is scanned.
    pub async fn find_by_barcode(&self, barcode: &str) -> ProductResult<Product> {
        sqlx::query_as::<_, Product>(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE barcode = ?"
        ))
        .bind(barcode.trim())
        .fetch_optional(&*self.db)
        .await?
        .ok_or_else(|| ProductError::NotFound(barcode.to_string()))
    }

    /// Apply `update`. Returns the stored product and, when the image was
    /// replaced, the public id of the previous image.
    ///
    /// Unset fields are kept by the statement itself. An image replacement
    /// only lands if the row still holds the image id read just before, so
    /// two concurrent replacements each report the id they actually replaced.
    pub async fn update(
        &self,
        id: Uuid,
        update: ProductUpdate,
    ) -> ProductResult<(Product, Option<String>)> {
        if update.image.is_none() {
            let product = self
                .try_update(id, &update, None)
                .await?
                .ok_or_else(|| ProductError::NotFound(id.to_string()))?;
            return Ok((product, None));
        }

        for _ in 0..MAX_UPDATE_ATTEMPTS {
            let previous = self.get(id).await?.image_id;
            if let Some(product) = self.try_update(id, &update, Some(previous.as_deref())).await? {
                return Ok((product, previous));
            }
            debug!(%id, "product image changed underneath update, retrying");
        }
        Err(ProductError::Conflict(id.to_string()))
    }

    /// Single `UPDATE`. With `expected_image`, the row must still hold that
    /// image id (`None` inside meaning no image); `Ok(None)` when no row matched.
    async fn try_update(
        &self,
        id: Uuid,
        update: &ProductUpdate,
        expected_image: Option<Option<&str>>,
    ) -> ProductResult<Option<Product>> {
        let (image_url, image_id) = split_image(update.image.clone());

        sqlx::query_as::<_, Product>(&format!(
            "UPDATE products
             SET name = COALESCE(?, name),
                 barcode = COALESCE(?, barcode),
                 price_cents = COALESCE(?, price_cents),
                 stock = COALESCE(?, stock),
                 category = COALESCE(?, category),
                 image_url = COALESCE(?, image_url),
                 image_id = COALESCE(?, image_id),
                 updated_at = ?
             WHERE id = ? AND (? = 0 OR image_id IS ?)
             RETURNING {PRODUCT_COLUMNS}"
        ))
        .bind(&update.name)
        .bind(&update.barcode)
        .bind(update.price_cents)
        .bind(update.stock)
        .bind(&update.category)
        .bind(image_url)
        .bind(image_id)
        .bind(Utc::now())
        .bind(id)
        .bind(expected_image.is_some())
        .bind(expected_image.flatten())
        .fetch_optional(&*self.db)
        .await
        .map_err(|err| barcode_conflict(err, update.barcode.as_deref()))
    }

    /// Delete a product, returning the removed row.
    pub async fn delete(&self, id: Uuid) -> ProductResult<Product> {
        sqlx::query_as::<_, Product>(&format!(
            "DELETE FROM products WHERE id = ? RETURNING {PRODUCT_COLUMNS}"
        ))
        .bind(id)
        .fetch_optional(&*self.db)
        .await?
        .ok_or_else(|| ProductError::NotFound(id.to_string()))
    }
}

/// Trimmed, non-empty form value.
fn field<'a>(fields: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    fields
        .get(name)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
}

fn split_image(image: Option<RemoteAsset>) -> (Option<String>, Option<String>) {
    match image {
        Some(asset) => (Some(asset.url), Some(asset.public_id)),
        None => (None, None),
    }
}

fn check_name(name: &str) -> ProductResult<String> {
    if name.chars().count() > MAX_NAME_LEN {
        return Err(ProductError::InvalidInput(format!(
            "name must be at most {MAX_NAME_LEN} characters"
        )));
    }
    Ok(name.to_string())
}

fn check_barcode(barcode: &str) -> ProductResult<String> {
    if barcode.len() > MAX_BARCODE_LEN
        || !barcode
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-')
    {
        return Err(ProductError::InvalidInput(
            "barcode may only contain letters, digits and hyphens".into(),
        ));
    }
    Ok(barcode.to_string())
}

/// Parse a decimal price such as `12`, `12.5` or `12.50` into cents.
pub fn parse_price(raw: &str) -> ProductResult<i64> {
    let invalid = || ProductError::InvalidInput(format!("invalid price `{raw}`"));
    let (whole, frac) = match raw.split_once('.') {
        Some((whole, frac)) => (whole, frac),
        None => (raw, ""),
    };
    if whole.is_empty()
        || frac.len() > 2
        || !whole.chars().all(|c| c.is_ascii_digit())
        || !frac.chars().all(|c| c.is_ascii_digit())
    {
        return Err(invalid());
    }

    let whole: i64 = whole.parse().map_err(|_| invalid())?;
    let cents: i64 = match frac.len() {
        0 => 0,
        1 => frac.parse::<i64>().map_err(|_| invalid())? * 10,
        _ => frac.parse().map_err(|_| invalid())?,
    };
    whole
        .checked_mul(100)
        .and_then(|w| w.checked_add(cents))
        .ok_or_else(invalid)
}

fn parse_stock(raw: &str) -> ProductResult<i64> {
    raw.parse::<i64>()
        .ok()
        .filter(|n| *n >= 0)
        .ok_or_else(|| ProductError::InvalidInput(format!("invalid stock `{raw}`")))
}

/// Map a unique violation on `barcode` to `DuplicateBarcode`.
fn barcode_conflict(err: sqlx::Error, barcode: Option<&str>) -> ProductError {
    match barcode {
        Some(code) if is_unique_violation(&err) => ProductError::DuplicateBarcode(code.to_string()),
        _ => ProductError::Sqlx(err),
    }
}

/// Return true if SQLx error indicates a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}
