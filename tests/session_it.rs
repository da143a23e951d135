use qtrade::prelude::*;

mod common;
use common::*;

fn buy(n: usize, idx: usize) -> Action {
    Action::single(n, idx, Decision::Buy)
}

fn sell(n: usize, idx: usize) -> Action {
    Action::single(n, idx, Decision::Sell)
}

#[test]
fn balances_and_holdings_never_go_negative() -> anyhow::Result<()> {
    setup_tracing();
    let source = setup_sinusoid_source();
    let codec = setup_agent_config(&["STOCK_1", "STOCK_2"], 3).codec();

    for seed in 0..10 {
        let mut agent = RandomAgent::new(codec.clone()).with_seed(seed);
        let trajectory = Session::new(
            source.clone(),
            &mut agent,
            SessionConfig::new(ymd(2015, 2, 1), ymd(2015, 6, 30), 1_000.0 + seed as f64 * 37.0),
        )?
        .run_to_end()?;

        for record in trajectory.records() {
            assert!(record.balance >= 0.0, "negative balance on {}", record.date);
        }
    }
    Ok(())
}

#[test]
fn net_worth_is_balance_plus_holdings_at_the_low() -> anyhow::Result<()> {
    setup_tracing();
    let source = setup_sinusoid_source();
    let codec = setup_agent_config(&["STOCK_1", "STOCK_2"], 2).codec();
    let mut agent = RandomAgent::new(codec.clone()).with_seed(42);

    let trajectory = Session::new(
        source.clone(),
        &mut agent,
        SessionConfig::new(ymd(2015, 3, 1), ymd(2015, 4, 30), 2_500.0),
    )?
    .run_to_end()?;

    for record in &trajectory.records()[1..] {
        let prices = codec.prices_on(&*source, record.date)?;
        let expected = record.balance
            + record
                .holdings
                .iter()
                .zip(&prices)
                .map(|(q, p)| *q as f64 * p.low.0)
                .sum::<f64>();
        assert_eq!(record.net_worth, expected);
    }
    Ok(())
}

#[test]
fn flat_buy_then_sell_loses_only_the_floor_residue() -> anyhow::Result<()> {
    setup_tracing();
    let source = setup_flat_source(&["FLAT"], 3.0, 10);
    let codec = setup_agent_config(&["FLAT"], 1).codec();
    let mut agent = ScriptedAgent::new(codec, vec![buy(1, 0), sell(1, 0)]);

    let trajectory = Session::new(
        source,
        &mut agent,
        SessionConfig::new(ymd(2020, 1, 3), ymd(2020, 1, 6), 100.0),
    )?
    .run_to_end()?;
    let records = trajectory.records();

    assert_eq!(records[1].holdings.as_slice(), &[33]);
    assert!((records[1].balance - 1.0).abs() < 1e-9);
    assert_eq!(records[2].holdings.as_slice(), &[0]);
    assert!((records[2].balance - 100.0).abs() < 1e-9);

    let net_worths = trajectory.net_worths().collect::<Vec<_>>();
    for pair in net_worths.windows(2) {
        assert!(pair[1] <= pair[0] + 1e-9);
        assert!(pair[0] - pair[1] < 3.0);
    }
    Ok(())
}

#[test]
fn sell_zeroes_the_holding_and_credits_the_low() -> anyhow::Result<()> {
    setup_tracing();
    let source = setup_sinusoid_source();
    let codec = setup_agent_config(&["STOCK_1", "STOCK_2"], 2).codec();
    let script = vec![buy(2, 0), sell(2, 0), buy(2, 1), sell(2, 1)];
    let mut agent = ScriptedAgent::new(codec.clone(), script);

    let trajectory = Session::new(
        source.clone(),
        &mut agent,
        SessionConfig::new(ymd(2015, 5, 1), ymd(2015, 5, 10), 500.0),
    )?
    .run_to_end()?;

    let mut sells = 0;
    for (before, after) in trajectory.transitions() {
        let Some(action) = &after.action else {
            continue;
        };
        for (idx, decision) in action.decisions().iter().enumerate() {
            if *decision != Decision::Sell {
                continue;
            }
            sells += 1;
            let low = codec.prices_on(&*source, after.date)?[idx].low.0;
            assert_eq!(after.holdings[idx], 0);
            assert_eq!(after.fills[idx], -(before.holdings[idx] as i64));
            let credited = after.balance - before.balance;
            assert!((credited - before.holdings[idx] as f64 * low).abs() < 1e-9);
        }
    }
    assert_eq!(sells, 2);
    Ok(())
}

#[test]
fn every_recorded_action_was_legal_and_single_instrument() -> anyhow::Result<()> {
    setup_tracing();
    let source = setup_sinusoid_source();
    let config = setup_agent_config(&["STOCK_1", "STOCK_2"], 2).with_exploration(0.5);
    let mut agent = setup_linear_agent(&config);
    let codec = config.codec();

    let trajectory = Session::new(
        source.clone(),
        &mut agent,
        SessionConfig::new(ymd(2015, 7, 1), ymd(2015, 8, 31), 300.0),
    )?
    .run_to_end()?;

    for (before, after) in trajectory.transitions() {
        let portfolio = Portfolio::from_parts(before.balance, before.holdings.clone())?;
        let prices = codec.prices_on(&*source, after.date)?;
        let legal = codec.legal_actions(&portfolio, &prices);
        let action = after.action.as_ref().expect("traded dates carry an action");
        assert!(legal.contains(action));
        assert!(action.decisions().iter().filter(|d| **d != Decision::Hold).count() <= 1);
    }
    Ok(())
}

#[test]
fn missing_history_is_fatal_to_the_episode() {
    setup_tracing();
    let source = setup_flat_source(&["FLAT"], 1.0, 5);
    let codec = setup_agent_config(&["FLAT"], 3).codec();
    let mut agent = RandomAgent::new(codec).with_seed(1);

    let mut session = Session::new(
        source,
        &mut agent,
        SessionConfig::new(ymd(2020, 1, 2), ymd(2020, 1, 5), 10.0),
    )
    .unwrap();

    let err = session.run().unwrap_err();
    assert!(matches!(
        err,
        QtradeError::Data(DataError::InsufficientHistory { requested: 3, .. })
    ));
    assert_ne!(session.status(), SessionStatus::Completed);
}

#[test]
fn unknown_symbol_is_not_found() {
    setup_tracing();
    let source = setup_flat_source(&["FLAT"], 1.0, 5);
    let codec = setup_agent_config(&["OTHER"], 1).codec();
    let mut agent = RandomAgent::new(codec).with_seed(1);

    let result = Session::new(
        source,
        &mut agent,
        SessionConfig::new(ymd(2020, 1, 2), ymd(2020, 1, 5), 10.0),
    )
    .unwrap()
    .run_to_end();

    assert!(matches!(
        result,
        Err(QtradeError::Data(DataError::NotFound { .. }))
    ));
}
