//! HTTP surface of the binary: liveness, readiness and the operator routes
//! for inspecting a queue and requeueing dead letters.

use actix_web::{get, post, web, HttpResponse, Responder};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::{error, info, warn};

use crate::error::OutboxError;
use crate::models::{BusinessType, DeadLetter};
use crate::outbox;

const DEFAULT_DEAD_LETTER_LIMIT: i64 = 50;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(health_check)
        .service(readiness)
        .service(queue_status)
        .service(requeue_dead_letter);
}

#[get("/health")]
async fn health_check() -> impl Responder {
    // Just return a 200 OK response
    HttpResponse::Ok().body("OK")
}

#[get("/ready")]
async fn readiness(pool: web::Data<PgPool>) -> impl Responder {
    match sqlx::query("SELECT 1").execute(pool.get_ref()).await {
        Ok(_) => HttpResponse::Ok().body("READY"),
        Err(e) => {
            warn!("Readiness check failed: {}", e);
            HttpResponse::ServiceUnavailable().body("DATABASE UNAVAILABLE")
        }
    }
}

#[derive(Debug, Deserialize)]
struct DeadLetterQuery {
    limit: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct QueueStatus {
    pub business_type: i32,
    pub pending: i64,
    pub dead_letters: Vec<DeadLetterView>,
}

/// A dead letter as operators see it; the payload is rendered as text.
#[derive(Debug, Serialize, Deserialize)]
pub struct DeadLetterView {
    pub id: i64,
    pub message_id: i64,
    pub payload: String,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub dead_lettered_at: DateTime<Utc>,
}

impl From<DeadLetter> for DeadLetterView {
    fn from(dead_letter: DeadLetter) -> Self {
        Self {
            id: dead_letter.id,
            message_id: dead_letter.message_id,
            payload: String::from_utf8_lossy(&dead_letter.payload).into_owned(),
            attempts: dead_letter.attempts,
            last_error: dead_letter.last_error,
            dead_lettered_at: dead_letter.dead_lettered_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Requeued {
    pub message_id: i64,
}

fn internal_error(e: OutboxError) -> HttpResponse {
    error!("Outbox admin request failed: {}", e);
    HttpResponse::InternalServerError().body("OUTBOX UNAVAILABLE")
}

#[get("/outbox/{business_type}")]
async fn queue_status(
    pool: web::Data<PgPool>,
    path: web::Path<i32>,
    query: web::Query<DeadLetterQuery>,
) -> HttpResponse {
    let business_type = BusinessType(path.into_inner());
    let limit = query.limit.unwrap_or(DEFAULT_DEAD_LETTER_LIMIT).clamp(0, 1000);

    let mut conn = match pool.acquire().await {
        Ok(conn) => conn,
        Err(e) => return internal_error(e.into()),
    };
    let pending = match outbox::pending_count(&mut conn, business_type).await {
        Ok(pending) => pending,
        Err(e) => return internal_error(e),
    };
    match outbox::list_dead_letters(&mut conn, business_type, limit).await {
        Ok(dead_letters) => HttpResponse::Ok().json(QueueStatus {
            business_type: business_type.0,
            pending,
            dead_letters: dead_letters.into_iter().map(DeadLetterView::from).collect(),
        }),
        Err(e) => internal_error(e),
    }
}

#[post("/dead-letters/{id}/requeue")]
async fn requeue_dead_letter(pool: web::Data<PgPool>, path: web::Path<i64>) -> HttpResponse {
    let dead_letter_id = path.into_inner();

    let mut conn = match pool.acquire().await {
        Ok(conn) => conn,
        Err(e) => return internal_error(e.into()),
    };
    match outbox::requeue_dead_letter(&mut conn, dead_letter_id).await {
        Ok(Some(message_id)) => {
            info!(dead_letter_id, message_id, "Dead letter requeued.");
            HttpResponse::Ok().json(Requeued { message_id })
        }
        Ok(None) => HttpResponse::NotFound().body("NO SUCH DEAD LETTER"),
        Err(e) => internal_error(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::provision_lock_rows;
    use actix_web::{test, App};
    use sqlx::Executor;

    #[actix_web::test]
    async fn health_is_always_ok() {
        let app = test::init_service(App::new().configure(configure)).await;
        let resp = test::call_service(&app, test::TestRequest::get().uri("/health").to_request()).await;

        assert!(resp.status().is_success());
        assert_eq!(test::read_body(resp).await, web::Bytes::from_static(b"OK"));
    }

    #[sqlx::test(migrations = false)]
    #[ignore = "requires PostgreSQL (DATABASE_URL)"]
    async fn operator_can_inspect_and_requeue_dead_letters(pool: PgPool) {
        pool.execute(include_str!("../schema.sql")).await.expect("Failed to create schema");
        let mut conn = pool.acquire().await.unwrap();
        provision_lock_rows(&mut conn, &[BusinessType(7)]).await.unwrap();
        outbox::enqueue(&mut conn, BusinessType(7), &["poison", "next"]).await.unwrap();
        let head = outbox::peek_oldest(&mut conn, BusinessType(7)).await.unwrap().unwrap();
        outbox::record_failed_attempt(&mut conn, head.id, "boom").await.unwrap();
        outbox::move_to_dead_letter(&mut conn, head.id, "boom").await.unwrap();

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(pool.clone()))
                .configure(configure),
        )
        .await;

        let ready = test::call_service(&app, test::TestRequest::get().uri("/ready").to_request()).await;
        assert!(ready.status().is_success());

        let status: QueueStatus =
            test::call_and_read_body_json(&app, test::TestRequest::get().uri("/outbox/7").to_request()).await;
        assert_eq!(status.pending, 1);
        assert_eq!(status.dead_letters.len(), 1);
        let dead = &status.dead_letters[0];
        assert_eq!(dead.message_id, head.id);
        assert_eq!(dead.payload, "poison");
        assert_eq!(dead.attempts, 1);
        assert_eq!(dead.last_error.as_deref(), Some("boom"));

        let uri = format!("/dead-letters/{}/requeue", dead.id);
        let requeued: Requeued =
            test::call_and_read_body_json(&app, test::TestRequest::post().uri(&uri).to_request()).await;
        assert!(requeued.message_id > head.id);

        let status: QueueStatus =
            test::call_and_read_body_json(&app, test::TestRequest::get().uri("/outbox/7").to_request()).await;
        assert_eq!(status.pending, 2);
        assert!(status.dead_letters.is_empty());

        let missing = test::call_service(&app, test::TestRequest::post().uri(&uri).to_request()).await;
        assert_eq!(missing.status(), actix_web::http::StatusCode::NOT_FOUND);
    }
}
