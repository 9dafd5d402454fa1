//! Destination table definition using sea-query.
//!
//! Column identifiers for type-safe query building, plus the CREATE TABLE
//! and upsert statements shared by every SQL backend.

use sea_query::{
    Alias, ColumnDef, Iden, InsertStatement, IntoIden, OnConflict, Query, SimpleExpr, Table,
    TableCreateStatement, TableRef,
};

use crate::model::CanonicalOrder;

/// Orders table columns.
#[derive(Iden, Clone, Copy)]
pub enum Orders {
    #[iden = "order_id"]
    OrderId,
    #[iden = "date_created"]
    DateCreated,
    #[iden = "date_modified"]
    DateModified,
    #[iden = "date_paid"]
    DatePaid,
    #[iden = "status"]
    Status,
    #[iden = "order_day"]
    OrderDay,
    #[iden = "customer_id"]
    CustomerId,
    #[iden = "customer_identifier"]
    CustomerIdentifier,
    #[iden = "is_guest"]
    IsGuest,
    #[iden = "order_total"]
    OrderTotal,
    #[iden = "shipping_total"]
    ShippingTotal,
    #[iden = "total_tax"]
    TotalTax,
    #[iden = "discount_total"]
    DiscountTotal,
    #[iden = "total_items"]
    TotalItems,
    #[iden = "distinct_items"]
    DistinctItems,
    #[iden = "latitude"]
    Latitude,
    #[iden = "longitude"]
    Longitude,
    #[iden = "payment_method"]
    PaymentMethod,
    #[iden = "device_type"]
    DeviceType,
    #[iden = "attribution_source"]
    AttributionSource,
    #[iden = "campaign_source"]
    CampaignSource,
    #[iden = "campaign_medium"]
    CampaignMedium,
    #[iden = "referrer_url"]
    ReferrerUrl,
    #[iden = "item_details"]
    ItemDetails,
    #[iden = "coupon_details"]
    CouponDetails,
}

/// Every column, in insert order.
pub const COLUMNS: [Orders; 25] = [
    Orders::OrderId,
    Orders::DateCreated,
    Orders::DateModified,
    Orders::DatePaid,
    Orders::Status,
    Orders::OrderDay,
    Orders::CustomerId,
    Orders::CustomerIdentifier,
    Orders::IsGuest,
    Orders::OrderTotal,
    Orders::ShippingTotal,
    Orders::TotalTax,
    Orders::DiscountTotal,
    Orders::TotalItems,
    Orders::DistinctItems,
    Orders::Latitude,
    Orders::Longitude,
    Orders::PaymentMethod,
    Orders::DeviceType,
    Orders::AttributionSource,
    Orders::CampaignSource,
    Orders::CampaignMedium,
    Orders::ReferrerUrl,
    Orders::ItemDetails,
    Orders::CouponDetails,
];

/// Destination table, optionally schema-qualified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableName {
    pub schema: Option<String>,
    pub table: String,
}

impl TableName {
    pub fn new(schema: Option<String>, table: impl Into<String>) -> Self {
        Self {
            schema: schema.filter(|s| !s.trim().is_empty()),
            table: table.into(),
        }
    }

    /// Drop the schema qualifier (for backends without schemas).
    pub fn unqualified(&self) -> Self {
        Self {
            schema: None,
            table: self.table.clone(),
        }
    }

    pub fn table_ref(&self) -> TableRef {
        match &self.schema {
            Some(schema) => TableRef::SchemaTable(
                Alias::new(schema.as_str()).into_iden(),
                Alias::new(self.table.as_str()).into_iden(),
            ),
            None => TableRef::Table(Alias::new(self.table.as_str()).into_iden()),
        }
    }
}

impl std::fmt::Display for TableName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{}.{}", schema, self.table),
            None => write!(f, "{}", self.table),
        }
    }
}

/// CREATE TABLE IF NOT EXISTS for the orders table.
pub fn create_table(table: &TableName) -> TableCreateStatement {
    Table::create()
        .table(table.table_ref())
        .if_not_exists()
        .col(ColumnDef::new(Orders::OrderId).big_integer().not_null().primary_key())
        .col(ColumnDef::new(Orders::DateCreated).timestamp_with_time_zone())
        .col(ColumnDef::new(Orders::DateModified).timestamp_with_time_zone())
        .col(ColumnDef::new(Orders::DatePaid).timestamp_with_time_zone())
        .col(ColumnDef::new(Orders::Status).string_len(50))
        .col(ColumnDef::new(Orders::OrderDay).small_integer())
        .col(ColumnDef::new(Orders::CustomerId).big_integer())
        .col(ColumnDef::new(Orders::CustomerIdentifier).string_len(64))
        .col(ColumnDef::new(Orders::IsGuest).boolean())
        .col(ColumnDef::new(Orders::OrderTotal).double())
        .col(ColumnDef::new(Orders::ShippingTotal).double())
        .col(ColumnDef::new(Orders::TotalTax).double())
        .col(ColumnDef::new(Orders::DiscountTotal).double())
        .col(ColumnDef::new(Orders::TotalItems).big_integer())
        .col(ColumnDef::new(Orders::DistinctItems).big_integer())
        .col(ColumnDef::new(Orders::Latitude).double())
        .col(ColumnDef::new(Orders::Longitude).double())
        .col(ColumnDef::new(Orders::PaymentMethod).text())
        .col(ColumnDef::new(Orders::DeviceType).text())
        .col(ColumnDef::new(Orders::AttributionSource).text())
        .col(ColumnDef::new(Orders::CampaignSource).text())
        .col(ColumnDef::new(Orders::CampaignMedium).text())
        .col(ColumnDef::new(Orders::ReferrerUrl).text())
        .col(ColumnDef::new(Orders::ItemDetails).json_binary())
        .col(ColumnDef::new(Orders::CouponDetails).json_binary())
        .to_owned()
}

/// Multi-row INSERT that overwrites every column on `order_id` collision.
pub fn upsert(
    table: &TableName,
    orders: &[CanonicalOrder],
) -> Result<InsertStatement, UpsertBuildError> {
    let mut stmt = Query::insert();
    stmt.into_table(table.table_ref()).columns(COLUMNS);

    for order in orders {
        stmt.values(row_values(order)?)?;
    }

    stmt.on_conflict(
        OnConflict::column(Orders::OrderId)
            .update_columns(COLUMNS.into_iter().skip(1))
            .to_owned(),
    );

    Ok(stmt)
}

/// Errors building an upsert statement.
#[derive(Debug, thiserror::Error)]
pub enum UpsertBuildError {
    #[error("failed to encode nested details: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to build statement: {0}")]
    Query(#[from] sea_query::error::Error),
}

fn row_values(order: &CanonicalOrder) -> Result<Vec<SimpleExpr>, serde_json::Error> {
    Ok(vec![
        order.order_id.into(),
        order.date_created.into(),
        order.date_modified.into(),
        order.date_paid.into(),
        order.status.clone().into(),
        order.order_day.into(),
        order.customer_id.into(),
        order.customer_identifier.clone().into(),
        order.is_guest.into(),
        order.order_total.into(),
        order.shipping_total.into(),
        order.total_tax.into(),
        order.discount_total.into(),
        order.total_items.into(),
        order.distinct_items.into(),
        order.latitude.into(),
        order.longitude.into(),
        order.payment_method.clone().into(),
        order.device_type.clone().into(),
        order.attribution_source.clone().into(),
        order.campaign_source.clone().into(),
        order.campaign_medium.clone().into(),
        order.referrer_url.clone().into(),
        serde_json::to_value(&order.item_details)?.into(),
        serde_json::to_value(&order.coupon_details)?.into(),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_query::{PostgresQueryBuilder, SqliteQueryBuilder};

    #[test]
    fn test_create_table_postgres() {
        let table = TableName::new(Some("analytics".to_string()), "customer_orders");
        let sql = create_table(&table).to_string(PostgresQueryBuilder);

        assert!(sql.starts_with(r#"CREATE TABLE IF NOT EXISTS "analytics"."customer_orders""#));
        assert!(sql.contains(r#""order_id" bigint NOT NULL PRIMARY KEY"#));
        assert!(sql.contains(r#""item_details" jsonb"#));
    }

    #[test]
    fn test_blank_schema_is_ignored() {
        let table = TableName::new(Some("  ".to_string()), "customer_orders");
        assert_eq!(table.schema, None);
        assert_eq!(table.to_string(), "customer_orders");
    }

    #[test]
    fn test_upsert_overwrites_all_columns_except_key() {
        let table = TableName::new(None, "customer_orders");
        let mut order = CanonicalOrder::empty(7);
        order.status = Some("completed".to_string());

        let sql = upsert(&table, &[order]).unwrap().to_string(SqliteQueryBuilder);

        assert!(sql.contains(r#"ON CONFLICT ("order_id") DO UPDATE SET"#));
        assert!(sql.contains(r#""status" = "excluded"."status""#));
        assert!(sql.contains(r#""coupon_details" = "excluded"."coupon_details""#));
        assert!(!sql.contains(r#""order_id" = "excluded"."order_id""#));
        assert!(sql.contains("'completed'"));
    }
}
