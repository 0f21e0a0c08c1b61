//! # Business Repository
//!
//! Lookup and creation of businesses, the tenants that own job runs.

use chrono::Utc;
use sea_orm::{ActiveModelTrait, ConnectionTrait, DatabaseConnection, EntityTrait, Set};
use uuid::Uuid;

use crate::models::business::{ActiveModel, Entity as Business, Model};

/// Repository for Business database operations
pub struct BusinessRepository {
    db: DatabaseConnection,
}

impl BusinessRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Create a new business
    pub async fn create(&self, name: Option<String>) -> Result<Model, sea_orm::DbErr> {
        let business = ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name),
            created_at: Set(Utc::now().fixed_offset()),
        };
        business.insert(&self.db).await
    }

    pub async fn find_by_id(&self, business_id: Uuid) -> Result<Option<Model>, sea_orm::DbErr> {
        Business::find_by_id(business_id).one(&self.db).await
    }

    /// List all businesses
    pub async fn list(&self) -> Result<Vec<Model>, sea_orm::DbErr> {
        Business::find().all(&self.db).await
    }

    pub async fn exists(&self, business_id: Uuid) -> Result<bool, sea_orm::DbErr> {
        business_exists(&self.db, business_id).await
    }
}

/// Whether `business_id` resolves on `conn`; usable inside a transaction.
pub async fn business_exists<C: ConnectionTrait>(
    conn: &C,
    business_id: Uuid,
) -> Result<bool, sea_orm::DbErr> {
    Ok(Business::find_by_id(business_id).one(conn).await?.is_some())
}
