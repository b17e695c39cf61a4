//! Webhook alerting
//!
//! Discord-compatible embeds for the two conditions worth paging on: an
//! execution failure (the unit voided on the submission path) and a long
//! no-opportunity drought (usually a venue or config problem, not a quiet
//! market). Enabled by the ALERT_WEBHOOK environment variable; when unset
//! the sink is disabled and sends are no-ops.

use std::env;

use chrono::Utc;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::errors::ExecutionError;
use crate::types::ExecutionPlan;

const COLOR_FAILURE: u32 = 0xFF0000;
const COLOR_DROUGHT: u32 = 0xFFA500;

#[derive(Serialize)]
struct WebhookMessage {
    content: Option<String>,
    embeds: Vec<WebhookEmbed>,
}

#[derive(Serialize)]
struct WebhookEmbed {
    title: String,
    description: String,
    color: u32,
    fields: Vec<EmbedField>,
    footer: Option<EmbedFooter>,
    timestamp: Option<String>,
}

#[derive(Serialize)]
struct EmbedField {
    name: String,
    value: String,
    inline: bool,
}

#[derive(Serialize)]
struct EmbedFooter {
    text: String,
}

/// Fire-and-forget alert sink. Send failures are logged, never propagated;
/// an unreachable webhook must not affect the trading loop.
pub struct WebhookAlerter {
    webhook_url: Option<String>,
    client: reqwest::Client,
}

impl WebhookAlerter {
    pub fn from_env() -> Self {
        let webhook_url = env::var("ALERT_WEBHOOK").ok().filter(|url| !url.is_empty());

        if webhook_url.is_some() {
            info!("Webhook alerts enabled");
        } else {
            warn!("ALERT_WEBHOOK not set, webhook alerts disabled");
        }

        Self {
            webhook_url,
            client: reqwest::Client::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.webhook_url.is_some()
    }

    /// Alert for a voided execution unit.
    pub async fn execution_failure(&self, plan: &ExecutionPlan, error: &ExecutionError) {
        self.post(&failure_message(plan, error), "execution failure")
            .await;
    }

    /// Alert after N consecutive cycles without a viable candidate.
    pub async fn no_opportunity_streak(&self, cycles: u64, instruments: usize) {
        self.post(&drought_message(cycles, instruments), "no-opportunity streak")
            .await;
    }

    async fn post(&self, message: &WebhookMessage, what: &str) {
        let webhook_url = match &self.webhook_url {
            Some(url) => url,
            None => return,
        };

        match self.client.post(webhook_url).json(message).send().await {
            Ok(response) => {
                if response.status().is_success() {
                    info!("Webhook alert sent: {what}");
                } else {
                    warn!(status = %response.status(), "Webhook returned non-success status");
                }
            }
            Err(e) => {
                error!("Failed to send webhook alert: {e}");
            }
        }
    }
}

fn failure_message(plan: &ExecutionPlan, error: &ExecutionError) -> WebhookMessage {
    WebhookMessage {
        content: None,
        embeds: vec![WebhookEmbed {
            title: "⚠️ Execution Failure".to_string(),
            description: format!(
                "Atomic unit voided with no partial state.\n**Route:** `{}`",
                plan.route.signature()
            ),
            color: COLOR_FAILURE,
            fields: vec![
                EmbedField {
                    name: "Principal".to_string(),
                    value: format!("{} {}", plan.principal, plan.route.funding_asset),
                    inline: true,
                },
                EmbedField {
                    name: "Expected Net".to_string(),
                    value: format!("{} {}", plan.expected_net, plan.route.funding_asset),
                    inline: true,
                },
                EmbedField {
                    name: "Error".to_string(),
                    value: format!("`{}`: {}", error.kind(), error),
                    inline: false,
                },
            ],
            footer: Some(EmbedFooter {
                text: "Flash-Loan Arbitrage Engine".to_string(),
            }),
            timestamp: Some(Utc::now().to_rfc3339()),
        }],
    }
}

fn drought_message(cycles: u64, instruments: usize) -> WebhookMessage {
    WebhookMessage {
        content: None,
        embeds: vec![WebhookEmbed {
            title: "😴 No Viable Opportunities".to_string(),
            description: format!(
                "{cycles} consecutive cycles without a candidate across \
                 {instruments} instruments. Worth checking venue health and \
                 the profit threshold."
            ),
            color: COLOR_DROUGHT,
            fields: vec![EmbedField {
                name: "Streak".to_string(),
                value: format!("{cycles} cycles"),
                inline: true,
            }],
            footer: Some(EmbedFooter {
                text: "Flash-Loan Arbitrage Engine".to_string(),
            }),
            timestamp: Some(Utc::now().to_rfc3339()),
        }],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Asset, OpportunityScore, PlannedLeg, Route, RouteLeg, VenueId};
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn plan() -> ExecutionPlan {
        let route = Route {
            legs: vec![
                RouteLeg {
                    venue: VenueId::from("orca"),
                    asset_in: Asset::from("USDC"),
                    asset_out: Asset::from("SOL"),
                    estimated_out: dec!(10),
                },
                RouteLeg {
                    venue: VenueId::from("raydium"),
                    asset_in: Asset::from("SOL"),
                    asset_out: Asset::from("USDC"),
                    estimated_out: dec!(1020),
                },
            ],
            funding_asset: Asset::from("USDC"),
            net_weight: -0.0198,
            liquidity_risk: 0.02,
        };
        ExecutionPlan {
            legs: vec![
                PlannedLeg {
                    venue: VenueId::from("orca"),
                    asset_in: Asset::from("USDC"),
                    asset_out: Asset::from("SOL"),
                    amount_in: dec!(1000),
                    expected_out: dec!(10),
                    min_out: dec!(9.95),
                },
                PlannedLeg {
                    venue: VenueId::from("raydium"),
                    asset_in: Asset::from("SOL"),
                    asset_out: Asset::from("USDC"),
                    amount_in: dec!(10),
                    expected_out: dec!(1020),
                    min_out: dec!(1014.9),
                },
            ],
            route,
            principal: dec!(1000),
            repay_amount: dec!(1000.9),
            expected_net: dec!(19.1),
            score: OpportunityScore {
                principal: dec!(1000),
                gross_profit: dec!(20),
                fee_cost: dec!(0.9),
                slippage_cost: dec!(0),
                net_profit: dec!(19.1),
                confidence: 0.8,
            },
            deadline: Utc::now() + Duration::seconds(30),
        }
    }

    #[test]
    fn test_disabled_without_webhook_url() {
        let alerter = WebhookAlerter {
            webhook_url: None,
            client: reqwest::Client::new(),
        };
        assert!(!alerter.is_enabled());
    }

    #[test]
    fn test_failure_message_carries_route_and_error_kind() {
        let error = ExecutionError::SubmissionFailure("rpc timed out".to_string());
        let message = failure_message(&plan(), &error);

        assert_eq!(message.embeds.len(), 1);
        let embed = &message.embeds[0];
        assert_eq!(embed.color, COLOR_FAILURE);
        assert!(embed.description.contains("USDC>orca:SOL>raydium:USDC"));
        let error_field = embed
            .fields
            .iter()
            .find(|f| f.name == "Error")
            .unwrap();
        assert!(error_field.value.contains("submission_failure"));
        assert!(error_field.value.contains("rpc timed out"));
        assert!(embed.timestamp.is_some());
    }

    #[test]
    fn test_drought_message_names_the_streak() {
        let message = drought_message(20, 3);
        let embed = &message.embeds[0];
        assert_eq!(embed.color, COLOR_DROUGHT);
        assert!(embed.description.contains("20 consecutive cycles"));
        assert_eq!(embed.fields[0].value, "20 cycles");
    }

    #[test]
    fn test_message_serializes_to_webhook_shape() {
        let message = drought_message(5, 2);
        let value = serde_json::to_value(&message).unwrap();
        assert!(value["embeds"][0]["title"].is_string());
        assert!(value["embeds"][0]["color"].is_u64());
        assert!(value["embeds"][0]["fields"].is_array());
    }
}
