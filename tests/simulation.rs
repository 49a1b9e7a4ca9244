use backtest_engine::config::SimulationConfig;
use backtest_engine::models::{MarketSample, RunParameters};
use backtest_engine::optimizer::{run_simulation, Optimizer};
use backtest_engine::policy::{Policy, PositionSizing};
use backtest_engine::portfolio::Portfolio;
use backtest_engine::position::PositionState;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn ensure_test_env() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn random_walk(seed: u64, len: usize) -> Vec<MarketSample> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut price = 30_000.0_f64;
    (0..len)
        .map(|i| {
            price *= 1.0 + rng.gen_range(-0.004..0.004);
            MarketSample::flat(1_600_000_000 + i as i64 * 60, price)
        })
        .collect()
}

fn parameters(predict_len: usize, fee: f64, stop_loss: f64) -> RunParameters {
    RunParameters {
        predict_len,
        init_cash: 5000.0,
        init_crypto: 0.0,
        fee,
        min_expected_returns: 0.0,
        stop_loss,
    }
}

#[test]
fn random_walks_keep_the_ledger_consistent() {
    ensure_test_env();
    for seed in 0..6 {
        let samples = random_walk(seed, 400);
        let fee = [0.0, 0.001, 0.005][seed as usize % 3];
        let (summary, portfolio) = run_simulation(
            &samples,
            &parameters(30, fee, -0.01),
            PositionSizing::default(),
            None,
        )
        .unwrap();

        assert!(
            portfolio.cash_history().iter().all(|&cash| cash >= -1e-9),
            "seed {} went insolvent",
            seed
        );
        assert_eq!(portfolio.crypto(), 0.0);
        assert!(portfolio
            .positions()
            .iter()
            .all(|p| p.state() == PositionState::Closed));
        assert_eq!(portfolio.value_history().len(), samples.len() - 1);
        assert_eq!(portfolio.returns_history().len(), samples.len() - 1);
        for (value, returns) in portfolio
            .value_history()
            .iter()
            .zip(portfolio.returns_history())
        {
            assert!((value - portfolio.initial_cash() - returns).abs() < 1e-6);
        }
        assert_eq!(summary.trades, portfolio.trades());
        assert_eq!(
            summary.final_portfolio_value,
            *portfolio.value_history().last().unwrap()
        );
        assert!((summary.settled_cash - portfolio.cash()).abs() < 1e-12);
    }
}

#[test]
fn every_sell_is_paired_with_a_buy() {
    ensure_test_env();
    let samples = random_walk(42, 300);
    let (_, portfolio) = run_simulation(
        &samples,
        &parameters(20, 0.002, -0.02),
        PositionSizing::default(),
        None,
    )
    .unwrap();

    // Terminal liquidation closes positions without counting trades.
    let positions = portfolio.positions().len();
    assert!(portfolio.trades() >= positions);
    assert!(portfolio.trades() <= positions * 2);
    for position in portfolio.positions() {
        let entry = position.entry().unwrap();
        let exit = position.exit().unwrap();
        assert!(exit.date >= entry.date);
        assert!(entry.cash > 0.0);
    }
}

#[test]
fn perfect_foresight_never_loses_money_without_fees() {
    ensure_test_env();
    for seed in 10..14 {
        let samples = random_walk(seed, 250);
        let (summary, _) = run_simulation(
            &samples,
            &parameters(15, 0.0, -2.0),
            PositionSizing::default(),
            None,
        )
        .unwrap();
        assert!(
            summary.final_portfolio_returns >= -1e-6,
            "seed {} lost {}",
            seed,
            summary.final_portfolio_returns
        );
    }
}

#[test]
fn higher_entry_threshold_trades_less() {
    ensure_test_env();
    let samples = random_walk(7, 300);
    let mut loose = parameters(25, 0.001, -2.0);
    loose.min_expected_returns = 0.0;
    let mut strict = loose;
    strict.min_expected_returns = 1_000_000.0;

    let (loose_summary, _) =
        run_simulation(&samples, &loose, PositionSizing::default(), None).unwrap();
    let (strict_summary, strict_portfolio) =
        run_simulation(&samples, &strict, PositionSizing::default(), None).unwrap();

    assert!(loose_summary.trades >= strict_summary.trades);
    assert_eq!(strict_summary.trades, 0);
    assert_eq!(strict_summary.final_portfolio_returns, 0.0);
    assert!(strict_portfolio.positions().is_empty());
}

#[test]
fn initial_crypto_is_liquidated_at_the_end() {
    ensure_test_env();
    let samples: Vec<MarketSample> = [100.0, 100.0, 100.0, 100.0]
        .iter()
        .enumerate()
        .map(|(i, &price)| MarketSample::flat(i as i64 * 60, price))
        .collect();

    let portfolio = Portfolio::new(1000.0, 2.0);
    let policy = Policy::new(0.0);
    let mut optimizer =
        Optimizer::new(portfolio, policy, SimulationConfig::new(2, 0.0)).unwrap();
    let summary = optimizer.iterate_policy(&samples).unwrap();

    assert_eq!(summary.trades, 0);
    assert!((summary.final_portfolio_value - 1200.0).abs() < 1e-9);
    assert!((summary.settled_cash - 1200.0).abs() < 1e-9);
    assert_eq!(optimizer.portfolio().crypto(), 0.0);
    assert_eq!(optimizer.portfolio().crypto_history().last(), Some(&0.0));
}

#[test]
fn custom_sizing_changes_position_cash() {
    ensure_test_env();
    let samples: Vec<MarketSample> = [100.0, 110.0, 120.0]
        .iter()
        .enumerate()
        .map(|(i, &price)| MarketSample::flat(i as i64 * 60, price))
        .collect();
    let sizing = PositionSizing {
        fraction: 0.5,
        floor: 0.0,
    };
    let (_, portfolio) =
        run_simulation(&samples, &parameters(2, 0.0, -2.0), sizing, None).unwrap();

    let first = portfolio.positions()[0].entry().unwrap();
    assert!((first.cash - 2500.0).abs() < 1e-9);
}
