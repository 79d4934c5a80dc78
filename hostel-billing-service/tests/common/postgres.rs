//! PostgreSQL-backed harness: the real application on ephemeral ports over
//! a throwaway schema.
//!
//! Tests using it are skipped unless `TEST_DATABASE_URL` is set.

use hostel_billing_service::config::{
    BillingConfig, CacheConfig, DatabaseConfig, GenerationConfig, NotificationQueueConfig,
    SchedulerConfig, SmtpConfig,
};
use hostel_billing_service::grpc::proto::hostel_billing_service_client::HostelBillingServiceClient;
use hostel_billing_service::services::Database;
use hostel_billing_service::startup::Application;
use rust_decimal::Decimal;
use service_core::config::Config as CoreConfig;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicU32, Ordering};
use tonic::transport::Channel;
use uuid::Uuid;

// Counter for unique schema names
static SCHEMA_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Database URL for testing, if one is configured.
pub fn test_database_url() -> Option<String> {
    std::env::var("TEST_DATABASE_URL").ok()
}

fn unique_schema_name() -> String {
    let counter = SCHEMA_COUNTER.fetch_add(1, Ordering::SeqCst);
    format!("test_hostel_billing_{}_{}", std::process::id(), counter)
}

fn with_search_path(base_url: &str, schema: &str) -> String {
    let separator = if base_url.contains('?') { "&" } else { "?" };
    format!("{}{}options=-c search_path%3D{}", base_url, separator, schema)
}

/// Running application plus a direct handle on its schema.
pub struct PostgresApp {
    pub grpc_address: String,
    pub http_port: u16,
    pub grpc_port: u16,
    pub db: Database,
    base_url: String,
    schema_name: String,
}

impl PostgresApp {
    /// Spawn the application, or `None` when no test database is configured.
    pub async fn spawn() -> Option<Self> {
        let Some(base_url) = test_database_url() else {
            eprintln!("TEST_DATABASE_URL not set, skipping PostgreSQL test");
            return None;
        };
        let schema_name = unique_schema_name();

        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(2)
            .connect(&base_url)
            .await
            .expect("Failed to connect to test database");
        sqlx::query(&format!("DROP SCHEMA IF EXISTS {} CASCADE", schema_name))
            .execute(&pool)
            .await
            .ok();
        sqlx::query(&format!("CREATE SCHEMA {}", schema_name))
            .execute(&pool)
            .await
            .expect("Failed to create test schema");
        pool.close().await;

        let db_url = with_search_path(&base_url, &schema_name);
        let config = BillingConfig {
            common: CoreConfig {
                host: IpAddr::V4(Ipv4Addr::LOCALHOST),
                port: 0,
            },
            service_name: "hostel-billing-service-test".to_string(),
            log_level: "warn".to_string(),
            otlp_endpoint: None,
            database: DatabaseConfig {
                url: db_url.clone(),
                max_connections: 5,
                min_connections: 1,
            },
            cache: CacheConfig {
                redis_url: None,
                rule_ttl_secs: 3600,
            },
            generation: GenerationConfig {
                chunk_size: 100,
                due_days: 30,
            },
            smtp: SmtpConfig {
                host: None,
                port: 587,
                username: String::new(),
                password: String::new(),
                from: "billing@hostel.test".to_string(),
            },
            notifications: NotificationQueueConfig { queue_capacity: 64 },
            scheduler: SchedulerConfig {
                enabled: false,
                interval_secs: 3600,
            },
        };

        let app = Application::build(config)
            .await
            .expect("Failed to build test application");
        let http_port = app.http_port();
        let grpc_port = app.grpc_port();
        let db = Database::new(&db_url, 5, 1)
            .await
            .expect("Failed to create test database");

        tokio::spawn(async move {
            app.run_until_stopped().await.ok();
        });

        // Wait for HTTP server to be ready by polling health endpoint
        let client = reqwest::Client::new();
        let health_url = format!("http://127.0.0.1:{}/health", http_port);
        for _ in 0..50 {
            if client.get(&health_url).send().await.is_ok() {
                break;
            }
            tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
        }

        // Additional wait for gRPC server
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;

        Some(PostgresApp {
            grpc_address: format!("http://127.0.0.1:{}", grpc_port),
            http_port,
            grpc_port,
            db,
            base_url,
            schema_name,
        })
    }

    /// Create a gRPC client connected to this test app.
    pub async fn grpc_client(&self) -> HostelBillingServiceClient<Channel> {
        HostelBillingServiceClient::connect(self.grpc_address.clone())
            .await
            .expect("Failed to connect to gRPC server")
    }

    /// Insert a staff member straight into the directory table.
    pub async fn insert_staff(&self, name: &str, email: Option<&str>, salary: Decimal) -> Uuid {
        let staff_id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO staff (staff_id, name, email, salary, is_active) VALUES ($1, $2, $3, $4, TRUE)",
        )
        .bind(staff_id)
        .bind(name)
        .bind(email)
        .bind(salary)
        .execute(self.db.pool())
        .await
        .expect("Failed to insert staff");
        staff_id
    }

    /// Drop the test schema.
    pub async fn cleanup(&self) {
        self.db.pool().close().await;
        if let Ok(pool) = sqlx::postgres::PgPoolOptions::new()
            .max_connections(1)
            .connect(&self.base_url)
            .await
        {
            sqlx::query(&format!("DROP SCHEMA IF EXISTS {} CASCADE", self.schema_name))
                .execute(&pool)
                .await
                .ok();
            pool.close().await;
        }
    }
}
