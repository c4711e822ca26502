pub mod config;
pub mod database;
pub mod dto;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod utils;

use std::sync::Arc;

use crate::services::{
    application_service::ApplicationService, booklet_service::BookletService,
    offer_service::OfferService, question_service::QuestionService,
    report_service::ReportService, roster_service::RosterProvider,
};
use sqlx::PgPool;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub jwt_secret: String,
    pub roster: Arc<dyn RosterProvider>,
    pub question_service: QuestionService,
    pub booklet_service: BookletService,
    pub offer_service: OfferService,
    pub application_service: ApplicationService,
    pub report_service: ReportService,
}

impl AppState {
    pub fn new(pool: PgPool, jwt_secret: String, roster: Arc<dyn RosterProvider>) -> Self {
        let question_service = QuestionService::new(pool.clone());
        let booklet_service = BookletService::new(pool.clone());
        let offer_service = OfferService::new(pool.clone());
        let application_service = ApplicationService::new(pool.clone(), roster.clone());
        let report_service = ReportService::new(pool.clone(), roster.clone());

        Self {
            pool,
            jwt_secret,
            roster,
            question_service,
            booklet_service,
            offer_service,
            application_service,
            report_service,
        }
    }
}
