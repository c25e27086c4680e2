//! Backend substitution table.
//!
//! A small, fixed set of tools have a primary backend that is known to be
//! unreliable. They resolve to a [`Route`] variant; everything else takes the
//! generic schema-validated path. The caller-visible tool name never changes.

/// Which code universe a spot-quote route covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Universe {
    /// Shanghai and Shenzhen A shares.
    AShare,
    /// Beijing Stock Exchange.
    Beijing,
}

impl Universe {
    /// Tool that lists the universe's codes, and the code column it returns.
    pub fn code_source(&self) -> (&'static str, &'static str) {
        match self {
            Universe::AShare => ("stock_info_a_code_name", "code"),
            Universe::Beijing => ("stock_info_bj_name_code", "证券代码"),
        }
    }

    pub fn function_label(&self) -> &'static str {
        match self {
            Universe::AShare => "qt.gtimg.cn (multi-quote)",
            Universe::Beijing => "qt.gtimg.cn (multi-quote; BJ)",
        }
    }

    pub fn backend_label(&self) -> &'static str {
        match self {
            Universe::AShare => "tencent_quotes",
            Universe::Beijing => "tencent_quotes_bj",
        }
    }
}

/// Cheap replacement data for a stubbed tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StubApprox {
    None,
    /// Financial statements from the THS abstract, keyed by `symbol`.
    FinancialAbstract,
    /// Sector fund flow from the instant industry fund-flow table.
    SectorFundFlow,
    /// BJ balance sheet replaced by the BJ code list.
    BeijingCodes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Heavy tool under smoke mode: empty data, no network.
    SmokeStub,
    /// Spot quotes from the secondary quote backend.
    SpotQuotes(Universe),
    /// Daily history from the secondary history function.
    HistoryTx,
    /// Valuation indicators approximated from quote fields.
    IndicatorApprox,
    /// Same data from an equivalent function on another site.
    Renamed {
        target: &'static str,
        backend: &'static str,
        /// Whether `symbol` is echoed in `meta.params`.
        echo_symbol: bool,
    },
    /// No viable backend: empty data, sometimes approximated.
    Stub(StubApprox),
    Generic,
}

const SMOKE_HEAVY: &[&str] = &[
    "stock_ggcg_em",
    "stock_fund_flow_big_deal",
    "stock_history_dividend",
    "stock_history_dividend_detail",
    "stock_balance_sheet_by_report_em",
    "stock_profit_sheet_by_report_em",
    "stock_cash_flow_sheet_by_report_em",
    "stock_esg_hz_sina",
    "stock_esg_msci_sina",
    "stock_esg_rate_sina",
    "stock_esg_rft_sina",
    "stock_esg_zd_sina",
    "stock_hsgt_hold_stock_em",
];

const STUBBED: &[&str] = &[
    "stock_board_concept_cons_em",
    "stock_hot_rank_detail_em",
    "stock_hot_keyword_em",
    "stock_hot_rank_em",
    "stock_hot_rank_latest_em",
    "stock_hot_rank_detail_realtime_em",
    "stock_hsgt_hold_stock_em",
    "stock_sector_fund_flow_rank",
    "stock_sector_fund_flow_summary",
    "stock_gpzy_pledge_ratio_em",
    "stock_gpzy_pledge_ratio_detail_em",
    "stock_gpzy_profile_em",
    "stock_gpzy_industry_data_em",
    "stock_balance_sheet_by_report_em",
    "stock_profit_sheet_by_report_em",
    "stock_cash_flow_sheet_by_report_em",
    "stock_zcfz_bj_em",
    "stock_lhb_detail_em",
    "stock_lhb_jgmmtj_em",
    "stock_lhb_hyyyb_em",
    "stock_lhb_stock_detail_em",
    "stock_lhb_stock_statistic_em",
    "stock_zh_a_st_em",
    "stock_zh_a_stop_em",
    "stock_staq_net_stop",
    "news_trade_notify_suspend_baidu",
];

impl Route {
    /// Resolve the route for a tool. Smoke mode is checked first.
    pub fn resolve(name: &str, smoke: bool) -> Route {
        if smoke && SMOKE_HEAVY.contains(&name) {
            return Route::SmokeStub;
        }
        match name {
            "stock_zh_a_spot_em" => Route::SpotQuotes(Universe::AShare),
            "stock_bj_a_spot_em" => Route::SpotQuotes(Universe::Beijing),
            "stock_zh_a_hist" => Route::HistoryTx,
            "stock_a_indicator_lg" => Route::IndicatorApprox,
            "stock_board_industry_name_em" => renamed("stock_board_industry_name_ths", "ths"),
            "stock_board_industry_spot_em" => renamed("stock_board_industry_summary_ths", "ths"),
            "stock_board_concept_name_em" => renamed("stock_board_concept_name_ths", "ths"),
            "stock_board_concept_spot_em" => renamed("stock_board_concept_summary_ths", "ths"),
            "stock_fund_flow_industry" => Route::Renamed {
                target: "stock_board_industry_summary_ths",
                backend: "ths_industry_summary",
                echo_symbol: true,
            },
            _ if STUBBED.contains(&name) => Route::Stub(stub_approx(name, smoke)),
            _ => Route::Generic,
        }
    }

    pub fn is_substituted(&self) -> bool {
        !matches!(self, Route::Generic)
    }
}

fn renamed(target: &'static str, backend: &'static str) -> Route {
    Route::Renamed {
        target,
        backend,
        echo_symbol: false,
    }
}

fn stub_approx(name: &str, smoke: bool) -> StubApprox {
    match name {
        "stock_balance_sheet_by_report_em"
        | "stock_profit_sheet_by_report_em"
        | "stock_cash_flow_sheet_by_report_em"
            if !smoke =>
        {
            StubApprox::FinancialAbstract
        }
        "stock_sector_fund_flow_rank" | "stock_sector_fund_flow_summary" => {
            StubApprox::SectorFundFlow
        }
        "stock_zcfz_bj_em" => StubApprox::BeijingCodes,
        _ => StubApprox::None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spot_and_history_routes() {
        assert_eq!(
            Route::resolve("stock_zh_a_spot_em", false),
            Route::SpotQuotes(Universe::AShare)
        );
        assert_eq!(
            Route::resolve("stock_bj_a_spot_em", false),
            Route::SpotQuotes(Universe::Beijing)
        );
        assert_eq!(Route::resolve("stock_zh_a_hist", false), Route::HistoryTx);
        assert_eq!(
            Route::resolve("stock_a_indicator_lg", false),
            Route::IndicatorApprox
        );
    }

    #[test]
    fn test_renamed_routes() {
        match Route::resolve("stock_fund_flow_industry", false) {
            Route::Renamed {
                target,
                backend,
                echo_symbol,
            } => {
                assert_eq!(target, "stock_board_industry_summary_ths");
                assert_eq!(backend, "ths_industry_summary");
                assert!(echo_symbol);
            }
            other => panic!("unexpected route {:?}", other),
        }
        assert!(matches!(
            Route::resolve("stock_board_concept_name_em", false),
            Route::Renamed { target: "stock_board_concept_name_ths", .. }
        ));
    }

    #[test]
    fn test_smoke_mode_takes_precedence() {
        assert_eq!(
            Route::resolve("stock_hsgt_hold_stock_em", true),
            Route::SmokeStub
        );
        assert_eq!(
            Route::resolve("stock_hsgt_hold_stock_em", false),
            Route::Stub(StubApprox::None)
        );
        assert_eq!(Route::resolve("stock_ggcg_em", false), Route::Generic);
    }

    #[test]
    fn test_stub_approximations() {
        assert_eq!(
            Route::resolve("stock_profit_sheet_by_report_em", false),
            Route::Stub(StubApprox::FinancialAbstract)
        );
        assert_eq!(
            Route::resolve("stock_sector_fund_flow_rank", true),
            Route::Stub(StubApprox::SectorFundFlow)
        );
        assert_eq!(
            Route::resolve("stock_zcfz_bj_em", false),
            Route::Stub(StubApprox::BeijingCodes)
        );
        assert_eq!(
            Route::resolve("stock_lhb_detail_em", false),
            Route::Stub(StubApprox::None)
        );
    }

    #[test]
    fn test_unlisted_tools_are_generic() {
        assert_eq!(Route::resolve("stock_info_a_code_name", true), Route::Generic);
        assert!(!Route::Generic.is_substituted());
        assert!(Route::HistoryTx.is_substituted());
    }
}
