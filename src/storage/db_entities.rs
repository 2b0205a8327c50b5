//! SeaORM entity models used by the database storage backend.
//!
//! These structs map to the SQLite tables created by `database_storage`:
//! - `requests`: one row per scrape submission, keyed by client id
//! - `thumbnails`: one row per ingested image, owned by a request

/// Requests (sessions) table entity models.
pub mod requests {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "requests")]
    pub struct Model {
        /// Auto-increment row id, exposed as `SessionKey`
        #[sea_orm(primary_key)]
        pub id: i64,
        /// Client identity that submitted the scrape
        pub client_id: String,
        /// RFC3339 creation timestamp
        pub created_at: String,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {
        /// Owns many thumbnails
        #[sea_orm(has_many = "super::thumbnails::Entity")]
        Thumbnails,
    }

    impl Related<super::thumbnails::Entity> for Entity {
        fn to() -> RelationDef {
            Relation::Thumbnails.def()
        }
    }

    impl ActiveModelBehavior for ActiveModel {}
}

/// Thumbnails (artifacts) table entity models.
pub mod thumbnails {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "thumbnails")]
    pub struct Model {
        /// Auto-increment row id, exposed as `ArtifactKey`
        #[sea_orm(primary_key)]
        pub id: i64,
        /// Owning `requests.id`; no cascading foreign key
        pub request_id: i64,
        /// Servable thumbnail URL
        pub thumbnail_url: String,
        /// Object store name of the original bytes
        pub object_name: String,
        /// URL the image was fetched from
        pub source_url: String,
        /// RFC3339 creation timestamp
        pub created_at: String,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {
        /// Belongs to a request
        #[sea_orm(
            belongs_to = "super::requests::Entity",
            from = "Column::RequestId",
            to = "super::requests::Column::Id"
        )]
        Request,
    }

    impl Related<super::requests::Entity> for Entity {
        fn to() -> RelationDef {
            Relation::Request.def()
        }
    }

    impl ActiveModelBehavior for ActiveModel {}
}
