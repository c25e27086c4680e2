//! Custom views compiled into the service.

use super::{PlanStep, ViewPlanner, ViewSpec};
use crate::provider::symbols::{normalize_a_symbol, normalize_yyyymmdd, zfill6};
use crate::types::{Error, Result};
use serde_json::{json, Map, Value};
use std::sync::Arc;

pub fn builtin_views() -> Result<Vec<ViewSpec>> {
    Ok(vec![
        ViewSpec::custom(
            "stock_snapshot_cn",
            "单只A股快照：估值指标、个股信息与日线行情",
            json!({
                "type": "object",
                "properties": {
                    "symbol": {"type": "string", "description": "6位代码或带交易所前缀"},
                    "start_date": {"type": "string", "description": "YYYYMMDD"},
                    "end_date": {"type": "string", "description": "YYYYMMDD"}
                },
                "required": ["symbol"]
            }),
            Arc::new(StockSnapshot),
        )?,
        ViewSpec::custom(
            "market_overview_cn",
            "A股市场概览：行业板块、概念板块与行业资金流",
            json!({"type": "object", "properties": {}, "required": []}),
            Arc::new(MarketOverview),
        )?,
    ])
}

struct StockSnapshot;

impl ViewPlanner for StockSnapshot {
    fn plan(&self, params: &Map<String, Value>) -> Result<Vec<PlanStep>> {
        let raw = match params.get("symbol") {
            Some(Value::String(s)) if !s.trim().is_empty() => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => return Err(Error::validation("symbol is required")),
        };
        let digits = normalize_a_symbol(&raw);
        if digits.is_empty() {
            return Err(Error::validation(format!("invalid symbol: {}", raw)));
        }
        let symbol = zfill6(&digits);
        let start = normalize_yyyymmdd(params.get("start_date").and_then(Value::as_str), "19700101");
        let end = normalize_yyyymmdd(params.get("end_date").and_then(Value::as_str), "20500101");

        Ok(vec![
            PlanStep::new("indicator", "stock_a_indicator_lg", json!({"symbol": symbol})),
            PlanStep::new("info", "stock_individual_info_em", json!({"symbol": symbol})),
            PlanStep::new(
                "hist",
                "stock_zh_a_hist",
                json!({
                    "symbol": symbol,
                    "period": "daily",
                    "start_date": start,
                    "end_date": end,
                    "adjust": "",
                }),
            ),
        ])
    }
}

struct MarketOverview;

impl ViewPlanner for MarketOverview {
    fn plan(&self, _params: &Map<String, Value>) -> Result<Vec<PlanStep>> {
        Ok(vec![
            PlanStep::new("industry", "stock_board_industry_spot_em", json!({})),
            PlanStep::new("concept", "stock_board_concept_spot_em", json!({})),
            PlanStep::new("industry_flow", "stock_fund_flow_industry", json!({"symbol": "即时"})),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan_for(name: &str, params: Value) -> Result<Vec<PlanStep>> {
        let views = builtin_views().unwrap();
        let spec = views.into_iter().find(|v| v.name == name).unwrap();
        spec.planner.unwrap().plan(params.as_object().unwrap())
    }

    #[test]
    fn test_snapshot_plan() {
        let plan = plan_for(
            "stock_snapshot_cn",
            json!({"symbol": "sh600000", "start_date": "2024-01-02"}),
        )
        .unwrap();
        let keys: Vec<_> = plan.iter().map(PlanStep::result_key).collect();
        assert_eq!(keys, vec!["indicator", "info", "hist"]);
        assert_eq!(plan[2].args["symbol"], "600000");
        assert_eq!(plan[2].args["start_date"], "20240102");
        assert_eq!(plan[2].args["end_date"], "20500101");
    }

    #[test]
    fn test_snapshot_requires_symbol() {
        let err = plan_for("stock_snapshot_cn", json!({})).unwrap_err();
        assert!(err.to_string().contains("symbol is required"));
    }

    #[test]
    fn test_overview_plan() {
        let plan = plan_for("market_overview_cn", json!({})).unwrap();
        assert_eq!(plan.len(), 3);
        assert_eq!(plan[2].args["symbol"], "即时");
    }
}
