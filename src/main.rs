#[macro_use]
extern crate diesel;
use std::{sync::Arc, time::Duration};

use crate::{
    allocator::SlotAllocator, clock::SystemClock, configuration::Configuration,
    configuration_handler::ConfigurationHandler, database_interface::DatabaseInterface,
    http::create_app, local_appointments::LocalAppointments,
};
use tokio::time::sleep;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod allocator;
mod backend;
mod clock;
mod configuration;
mod configuration_handler;
mod database_interface;
mod error;
mod http;
mod local_appointments;
mod plate;
mod schedule;
mod schema;
#[cfg(test)]
mod testutils;
mod types;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("#####################");
    println!("# Carwash Scheduler #");
    println!("#####################");

    let configuration = ConfigurationHandler::parse_arguments();
    let schedule = match configuration.schedule() {
        Ok(schedule) => schedule,
        Err(err) => {
            error!(%err, "Invalid slot schedule");
            return;
        }
    };
    info!(
        weekdays = ?schedule.weekday_hours.map(|hours| hours.to_string()),
        saturday = ?schedule.saturday_hours.map(|hours| hours.to_string()),
        sunday = ?schedule.sunday_hours.map(|hours| hours.to_string()),
        interval_minutes = schedule.interval_minutes,
        capacity = schedule.capacity,
        plate_format = %configuration.plate_format(),
        "Slot schedule configured"
    );
    let allocator = SlotAllocator::new(
        schedule,
        configuration.plate_format(),
        Arc::new(SystemClock),
    );

    let address = format!("0.0.0.0:{}", configuration.port());
    println!("Accessible at:\n{address}");
    let listener = match tokio::net::TcpListener::bind(&address).await {
        Ok(listener) => listener,
        Err(err) => {
            error!(?err, "Failed to bind {address}");
            return;
        }
    };

    let app = if let Some(database_url) = configuration.database_url() {
        let backend = loop {
            match DatabaseInterface::new(&database_url, allocator.clone()) {
                Ok(backend) => {
                    info!("Successfully connected to database");
                    break backend;
                }
                Err(err) => {
                    error!(?err, "Failed to establish database connection. Retry in 1 sec. Omit the database URL to keep appointments in memory instead.");
                    sleep(Duration::from_secs(1)).await;
                }
            }
        };
        create_app(backend, configuration)
    } else {
        let backend = LocalAppointments::new(allocator);
        if let Err(err) = backend.insert_default_services() {
            error!(?err, "Failed to seed the service catalog");
            return;
        }
        info!("Keeping appointments in memory");
        create_app(backend, configuration)
    };

    if let Err(err) = axum::serve(listener, app).await {
        error!(?err, "Server stopped");
    }
}
