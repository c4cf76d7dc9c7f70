//! `hapro routes`: the HTTP route table, in match order.

use anyhow::Result;
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

#[derive(Args, Debug)]
pub struct RoutesArgs {}

#[derive(Tabled)]
struct RouteRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "method")]
    method: String,
    #[tabled(rename = "pattern")]
    pattern: String,
    #[tabled(rename = "endpoint")]
    endpoint: String,
}

impl RoutesArgs {
    pub fn run(self) -> Result<()> {
        let table = hapro_router::table();
        let rows: Vec<RouteRow> = table
            .routes()
            .iter()
            .enumerate()
            .map(|(i, route)| RouteRow {
                index: i + 1,
                method: route.method().to_string(),
                pattern: route.pattern().to_string(),
                endpoint: route.handler().to_string(),
            })
            .collect();

        println!("{} ({} routes, first match wins)", "hapro routes".bold(), rows.len());
        let mut rendered = Table::new(rows);
        rendered.with(Style::rounded());
        println!("{rendered}");
        Ok(())
    }
}
