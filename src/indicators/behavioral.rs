//! Outlier and behavioral indicators: 9, 10, 12, 14, 15, 17 and 18

use super::{mean, percentage, rows_by, rows_by_client, sample_std, DetectionContext, DetectionError, Flags, Indicator, IndicatorId, IndicatorResult};
use crate::geographic_risk::normalize_country;
use crate::{text, Column, TransactionSet};
use chrono::{Datelike, Duration, Timelike};
use std::collections::{BTreeMap, BTreeSet};

/// 9: operations outside the client's own amount or destination profile
pub(crate) struct ProfileDeviation;

impl Indicator for ProfileDeviation {
    fn id(&self) -> IndicatorId {
        IndicatorId::ProfileDeviation
    }

    fn required_columns(&self) -> &'static [Column] {
        &[Column::Amount, Column::SenderDocumentNumber, Column::DestinationCountry]
    }

    fn detect(&self, set: &TransactionSet, ctx: &DetectionContext) -> Result<IndicatorResult, DetectionError> {
        let params = &ctx.config.params;
        let txs = set.transactions();
        let clients = rows_by_client(set);
        let mut flags = Flags::new();
        let mut risky = 0;

        for rows in clients.values() {
            if rows.len() < params.profile_min_operations {
                continue;
            }

            let values: Vec<f64> = rows.iter().filter_map(|&r| txs[r].amount).collect();
            let (Some(avg), Some(max)) = (mean(&values), values.iter().copied().reduce(f64::max)) else {
                continue;
            };
            let limit = match sample_std(&values) {
                Some(sd) if sd > 0.0 => avg + params.profile_sigma * sd,
                _ => params.profile_max_multiplier * max,
            };

            let mut destinations: BTreeMap<String, usize> = BTreeMap::new();
            for &r in rows {
                if let Some(d) = text(&txs[r].beneficiary.destination_country) {
                    *destinations.entry(normalize_country(d)).or_default() += 1;
                }
            }
            // ties resolve to the alphabetically first destination
            let dominant = destinations
                .iter()
                .fold(None, |best: Option<(&String, usize)>, (d, n)| match best {
                    Some((_, top)) if top >= *n => best,
                    _ => Some((d, *n)),
                });

            let mut unusual: Vec<(usize, Vec<String>)> = Vec::new();
            for &r in rows {
                let mut reasons = Vec::new();
                if let Some(amount) = txs[r].amount {
                    if amount > limit {
                        reasons.push(format!("Atypical amount ({:.2}), mean: {:.2}", amount, avg));
                    }
                }
                if let (Some((usual, count)), Some(d)) = (dominant, text(&txs[r].beneficiary.destination_country)) {
                    let d = normalize_country(d);
                    if count > params.profile_dominant_min_count && &d != usual {
                        reasons.push(format!("Unusual destination ({}), usual: {}", d, usual));
                    }
                }
                if !reasons.is_empty() {
                    unusual.push((r, reasons));
                }
            }

            if percentage(unusual.len(), rows.len()) > params.profile_client_share {
                risky += 1;
                for (r, reasons) in unusual {
                    flags.flag(r, &txs[r], reasons.join(" | "));
                }
            }
        }

        Ok(IndicatorResult::scored(
            self.id(),
            percentage(risky, clients.len()),
            ctx.breakpoints(self.id()),
            flags,
        ))
    }
}

/// 10: politically exposed clients
pub(crate) struct PoliticallyExposed;

impl Indicator for PoliticallyExposed {
    fn id(&self) -> IndicatorId {
        IndicatorId::PoliticallyExposed
    }

    fn required_columns(&self) -> &'static [Column] {
        &[Column::SenderDocumentNumber, Column::SenderIsPep]
    }

    fn detect(&self, set: &TransactionSet, ctx: &DetectionContext) -> Result<IndicatorResult, DetectionError> {
        let txs = set.transactions();
        let clients = rows_by_client(set);
        let mut flags = Flags::new();
        let mut exposed = 0;

        for rows in clients.values() {
            if rows.iter().any(|&r| txs[r].sender.is_pep == Some(true)) {
                exposed += 1;
                for &r in rows {
                    flags.flag(r, &txs[r], "Client identified as a politically exposed person (PEP)");
                }
            }
        }

        Ok(IndicatorResult::scored(
            self.id(),
            percentage(exposed, clients.len()),
            ctx.breakpoints(self.id()),
            flags,
        ))
    }
}

/// 12: agents moving far more money than the average agent
pub(crate) struct AgentVolume;

impl Indicator for AgentVolume {
    fn id(&self) -> IndicatorId {
        IndicatorId::AgentVolume
    }

    fn required_columns(&self) -> &'static [Column] {
        &[Column::AgentCode, Column::Amount]
    }

    fn detect(&self, set: &TransactionSet, ctx: &DetectionContext) -> Result<IndicatorResult, DetectionError> {
        let multiplier = ctx.config.params.agent_volume_multiplier;
        let txs = set.transactions();
        let agents = rows_by(set, |t| text(&t.agent_code).map(str::to_string));

        let volumes: BTreeMap<&String, f64> = agents
            .iter()
            .map(|(agent, rows)| (agent, rows.iter().filter_map(|&r| txs[r].amount).sum()))
            .collect();
        let average = mean(&volumes.values().copied().collect::<Vec<_>>()).unwrap_or_default();

        let mut flags = Flags::new();
        let mut heavy = 0;
        for (agent, volume) in &volumes {
            if *volume > average * multiplier {
                heavy += 1;
                let reason = format!(
                    "Agent {} volume {:.2} exceeds {}x the agent average ({:.2})",
                    agent, volume, multiplier, average
                );
                for &r in &agents[*agent] {
                    flags.flag(r, &txs[r], reason.clone());
                }
            }
        }

        Ok(IndicatorResult::scored(
            self.id(),
            percentage(heavy, agents.len()),
            ctx.breakpoints(self.id()),
            flags,
        ))
    }
}

/// 14: operations far above the mean of their municipality
pub(crate) struct AboveMunicipalMean;

impl Indicator for AboveMunicipalMean {
    fn id(&self) -> IndicatorId {
        IndicatorId::AboveMunicipalMean
    }

    fn required_columns(&self) -> &'static [Column] {
        &[Column::AgentCode, Column::Amount]
    }

    fn detect(&self, set: &TransactionSet, ctx: &DetectionContext) -> Result<IndicatorResult, DetectionError> {
        let multiplier = ctx.config.params.municipal_mean_multiplier;
        let txs = set.transactions();
        let global = mean(&super::amounts(set))
            .ok_or_else(|| DetectionError::InsufficientData("no parseable amounts".to_string()))?;

        let city_of = |r: usize| {
            if set.has_column(Column::AgentCity) {
                text(&txs[r].agent_city).map(str::to_uppercase)
            } else {
                None
            }
        };
        let mut city_means: BTreeMap<String, f64> = BTreeMap::new();
        for (city, rows) in rows_by(set, |t| text(&t.agent_city).map(str::to_uppercase)) {
            let values: Vec<f64> = rows.iter().filter_map(|&r| txs[r].amount).collect();
            if let Some(m) = mean(&values) {
                city_means.insert(city, m);
            }
        }

        let mut flags = Flags::new();
        for (row, tx) in txs.iter().enumerate() {
            let Some(amount) = tx.amount else { continue };
            let (scope, reference) = match city_of(row).and_then(|c| city_means.get(&c).map(|m| (c, *m))) {
                Some((city, m)) => (city, m),
                None => ("global".to_string(), global),
            };
            if amount > reference * multiplier {
                flags.flag(
                    row,
                    tx,
                    format!(
                        "Operation {:.2} of agent {} exceeds {}x the {} mean ({:.2})",
                        amount,
                        text(&tx.agent_code).unwrap_or("unknown"),
                        multiplier,
                        scope,
                        reference
                    ),
                );
            }
        }

        let ratio = percentage(flags.len(), txs.len());
        Ok(IndicatorResult::scored(self.id(), ratio, ctx.breakpoints(self.id()), flags))
    }
}

/// 15: month-over-month growth in clients or amounts
pub(crate) struct SuddenGrowth;

impl Indicator for SuddenGrowth {
    fn id(&self) -> IndicatorId {
        IndicatorId::SuddenGrowth
    }

    fn required_columns(&self) -> &'static [Column] {
        &[Column::Date, Column::SenderDocumentNumber, Column::Amount]
    }

    fn detect(&self, set: &TransactionSet, ctx: &DetectionContext) -> Result<IndicatorResult, DetectionError> {
        let txs = set.transactions();
        let months = rows_by(set, |t| t.date.map(|d| format!("{:04}-{:02}", d.year(), d.month())));
        if months.len() < 2 {
            return Err(DetectionError::InsufficientData("fewer than two months".to_string()));
        }

        let summary: Vec<(&String, &Vec<usize>, f64, f64)> = months
            .iter()
            .map(|(month, rows)| {
                let clients: BTreeSet<&str> = rows.iter().filter_map(|&r| text(&txs[r].sender.document_number)).collect();
                let total: f64 = rows.iter().filter_map(|&r| txs[r].amount).sum();
                (month, rows, clients.len() as f64, total)
            })
            .collect();

        let change = |previous: f64, current: f64| (previous > 0.0).then(|| (current - previous) * 100.0 / previous);
        let mut client_growth = Vec::new();
        let mut amount_growth = Vec::new();
        let mut flags = Flags::new();

        for pair in summary.windows(2) {
            let (_, _, prev_clients, prev_total) = pair[0];
            let (month, rows, clients, total) = pair[1];
            let by_clients = change(prev_clients, clients);
            let by_amount = change(prev_total, total);
            client_growth.extend(by_clients);
            amount_growth.extend(by_amount);

            let growing = by_clients.map_or(false, |g| g > 0.0) || by_amount.map_or(false, |g| g > 0.0);
            if growing {
                let reason = format!(
                    "Monthly growth in {}: clients {}, amount {}",
                    month,
                    describe_growth(by_clients),
                    describe_growth(by_amount)
                );
                for &r in rows {
                    flags.flag(r, &txs[r], reason.clone());
                }
            }
        }

        let ratio = match (mean(&client_growth), mean(&amount_growth)) {
            (Some(c), Some(a)) => c.max(a),
            (Some(g), None) | (None, Some(g)) => g,
            (None, None) => 0.0,
        };
        Ok(IndicatorResult::scored(self.id(), ratio, ctx.breakpoints(self.id()), flags))
    }
}

fn describe_growth(growth: Option<f64>) -> String {
    growth.map_or_else(|| "n/a".to_string(), |g| format!("{:+.1}%", g))
}

/// 17: operations in quick succession or outside business hours
pub(crate) struct UnusualTiming;

impl Indicator for UnusualTiming {
    fn id(&self) -> IndicatorId {
        IndicatorId::UnusualTiming
    }

    fn required_columns(&self) -> &'static [Column] {
        &[Column::AgentCode, Column::Date, Column::Time, Column::Amount, Column::SenderDocumentNumber]
    }

    fn detect(&self, set: &TransactionSet, ctx: &DetectionContext) -> Result<IndicatorResult, DetectionError> {
        let params = &ctx.config.params;
        let window = Duration::minutes(params.short_interval_minutes);
        let txs = set.transactions();
        let clients = rows_by_client(set);
        let mut flags = Flags::new();
        let mut risky = 0;

        for rows in clients.values() {
            let mut ordered = rows.clone();
            ordered.sort_by_key(|&r| (txs[r].timestamp().is_none(), txs[r].timestamp(), r));

            let mut evaluated = 0;
            let mut unusual = Vec::new();
            let mut previous = None;
            for &r in &ordered {
                let (Some(at), Some(_)) = (txs[r].timestamp(), txs[r].amount) else { continue };
                evaluated += 1;
                let close = previous.map_or(false, |p| at - p < window);
                let hour = at.hour();
                let off_hours = hour < params.business_hours_start || hour >= params.business_hours_end;
                if close || off_hours {
                    unusual.push(r);
                }
                previous = Some(at);
            }

            let share = percentage(unusual.len(), evaluated);
            if share > params.unusual_timing_client_share {
                risky += 1;
                let reason = format!("Operation in a short interval or at an unusual hour; client risk: {:.1}%", share);
                for r in unusual {
                    flags.flag(r, &txs[r], reason.clone());
                }
            }
        }

        Ok(IndicatorResult::scored(
            self.id(),
            percentage(risky, clients.len()),
            ctx.breakpoints(self.id()),
            flags,
        ))
    }
}

/// 18: agents sending on their own behalf, compared with ordinary clients
pub(crate) struct AgentAsSender;

impl Indicator for AgentAsSender {
    fn id(&self) -> IndicatorId {
        IndicatorId::AgentAsSender
    }

    fn required_columns(&self) -> &'static [Column] {
        &[Column::AgentCode, Column::Amount, Column::SenderIsAgent]
    }

    fn detect(&self, set: &TransactionSet, ctx: &DetectionContext) -> Result<IndicatorResult, DetectionError> {
        let txs = set.transactions();
        let breakpoints = ctx.breakpoints(self.id());
        let is_agent = |r: usize| txs[r].sender.is_agent == Some(true);
        let priced: Vec<usize> = (0..txs.len()).filter(|&r| txs[r].amount.is_some()).collect();

        let client_amounts: Vec<f64> = priced.iter().filter(|&&r| !is_agent(r)).filter_map(|&r| txs[r].amount).collect();
        let client_mean = mean(&client_amounts).filter(|m| *m > 0.0).ok_or_else(|| {
            DetectionError::InsufficientData("no ordinary clients to compare against".to_string())
        })?;
        let client_count = client_amounts.len() as f64;

        let mut by_agent: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
        for &r in priced.iter().filter(|&&r| is_agent(r)) {
            if let Some(agent) = text(&txs[r].agent_code) {
                by_agent.entry(agent).or_default().push(r);
            }
        }

        let mut flags = Flags::new();
        let mut ratios = Vec::new();
        for (agent, rows) in &by_agent {
            let amounts: Vec<f64> = rows.iter().filter_map(|&r| txs[r].amount).collect();
            let agent_mean = mean(&amounts).unwrap_or_default();
            let ratio = (agent_mean / client_mean + rows.len() as f64 / client_count) / 2.0;
            ratios.push(ratio);

            if breakpoints.score(ratio) >= ctx.config.params.agent_flag_score {
                let reason = format!("Agent {}: mean ratio {:.2}x against ordinary clients", agent, ratio);
                for &r in rows {
                    flags.flag(r, &txs[r], reason.clone());
                }
            }
        }

        let ratio = mean(&ratios).unwrap_or_default();
        Ok(IndicatorResult::scored(self.id(), ratio, breakpoints, flags))
    }
}
