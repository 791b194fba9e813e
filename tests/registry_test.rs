//! Registry, channel filter and configuration tests.

mod common;

use streamstate::channel::{ChannelGroup, Exchange, classify_cost_group};
use streamstate::simulator::{BitfinexSimulator, get_simulator, to_simulator_channels};
use streamstate::{
    ChannelFilter, Simulator, SimulatorConfig, StreamStateError, get_simulator_by_name,
};

use common::replay;

const BITFINEX_LOG: &str = include_str!("fixtures/bitfinex.log");
const BITMEX_LOG: &str = include_str!("fixtures/bitmex.log");

#[test]
fn test_filtered_simulator_ignores_untracked_state() {
    let mut simulator = BitfinexSimulator::new(ChannelFilter::only(["trade_btcusd"]));

    simulator
        .process_state("!subscribed", br#"{"book_btcusd":5,"trade_btcusd":6}"#)
        .unwrap();
    simulator
        .process_state("book_btcusd", b"[[100.0,1,2.0],[101.0,2,-1.5]]")
        .unwrap();

    assert!(simulator.book("book_btcusd").is_none());
    assert_eq!(simulator.subscribed().len(), 1);
    assert!(simulator.subscribed().contains_key("trade_btcusd"));
    assert!(matches!(
        simulator.take_state_snapshot(),
        Err(StreamStateError::FilterActive)
    ));
}

#[test]
fn test_filtered_replay_skips_untracked_books() {
    let mut simulator =
        get_simulator(Exchange::Bitfinex, Some(&["trades_tBTCUSD"][..]), SimulatorConfig::default())
            .unwrap();
    let channels = replay(simulator.as_mut(), BITFINEX_LOG);

    // channels still resolve even when their state is not tracked
    assert!(channels.iter().any(|channel| channel == "book_tBTCUSD"));

    let lines = simulator.take_snapshot().unwrap();
    let channels: Vec<&str> = lines.iter().map(|s| s.channel.as_str()).collect();
    assert_eq!(channels, ["trades_tBTCUSD"]);
}

#[test]
fn test_bitmex_filter_applies_to_tables() {
    let mut simulator =
        get_simulator(Exchange::Bitmex, Some(&["trade_XBTUSD"][..]), SimulatorConfig::default())
            .unwrap();
    replay(simulator.as_mut(), BITMEX_LOG);

    let lines = simulator.take_snapshot().unwrap();
    let channels: Vec<&str> = lines.iter().map(|s| s.channel.as_str()).collect();
    assert_eq!(channels, ["trade_XBTUSD"]);
}

#[test]
fn test_registry_by_name() {
    for exchange in Exchange::ALL {
        let simulator =
            get_simulator_by_name::<&str>(exchange.as_str(), None, SimulatorConfig::default())
                .unwrap();
        assert!(simulator.take_snapshot().unwrap().is_empty());
    }

    let result = get_simulator_by_name::<&str>("kraken", None, SimulatorConfig::default());
    assert!(matches!(result, Err(StreamStateError::UnsupportedExchange(name)) if name == "kraken"));
}

#[test]
fn test_registry_rejects_unknown_filter_channels() {
    let result = get_simulator(
        Exchange::Bitflyer,
        Some(&["lightning_orders_BTC_JPY"][..]),
        SimulatorConfig::default(),
    );
    assert!(matches!(
        result,
        Err(StreamStateError::UnsupportedChannel { .. })
    ));
}

#[test]
fn test_simulator_channels_by_exchange() {
    assert_eq!(
        to_simulator_channels(Exchange::Bitmex, &["orderBookL2_25_XBTUSD", "orderBookL2_25"])
            .unwrap(),
        ["orderBookL2_25"]
    );
    assert_eq!(
        to_simulator_channels(Exchange::Bitbank, &["depth_whole_btc_jpy"]).unwrap(),
        ["depth_whole_btc_jpy"]
    );
}

#[test]
fn test_cost_groups() {
    let cases = [
        (Exchange::Binance, "btcusdt@depth@100ms", ChannelGroup::Orderbook),
        (Exchange::Binance, "btcusdt@rest_depth", ChannelGroup::Orderbook),
        (Exchange::Binance, "btcusdt@aggTrade", ChannelGroup::Trade),
        (Exchange::Bitmex, "orderBookL2_XBTUSD", ChannelGroup::Orderbook),
        (Exchange::Bitmex, "instrument", ChannelGroup::Other),
        (Exchange::Bitfinex, "trades_tBTCUSD", ChannelGroup::Trade),
        (Exchange::Bitflyer, "lightning_board_snapshot_BTC_JPY", ChannelGroup::Orderbook),
        (Exchange::Liquid, "price_ladders_cash_btcjpy_sell", ChannelGroup::Orderbook),
        (Exchange::Liquid, "executions_cash_btcjpy", ChannelGroup::Trade),
        (Exchange::Bitbank, "ticker_btc_jpy", ChannelGroup::Other),
    ];
    for (exchange, channel, group) in cases {
        assert_eq!(
            classify_cost_group(exchange, channel).unwrap(),
            group,
            "{exchange} {channel}"
        );
    }
}

#[test]
fn test_config_file_overrides_defaults() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let path = dir.path().join("simulator.json");
    std::fs::write(&path, r#"{"diff_buffer_limit": 2}"#).expect("Failed to write config");

    let config = SimulatorConfig::load(&path).unwrap();
    assert_eq!(config.diff_buffer_limit, 2);
    assert_eq!(
        config.binance_price_precision,
        SimulatorConfig::default().binance_price_precision
    );

    let mut simulator = get_simulator::<&str>(Exchange::Binance, None, config).unwrap();
    simulator
        .process_start(b"wss://stream.binance.com:9443/stream?streams=btcusdt@depth")
        .unwrap();
    let diff = |first: u64| {
        format!(
            r#"{{"stream":"btcusdt@depth","data":{{"U":{first},"u":{first},"b":[],"a":[]}}}}"#
        )
    };
    simulator.process_message_ws(diff(1).as_bytes()).unwrap();
    simulator.process_message_ws(diff(2).as_bytes()).unwrap();
    let err = simulator.process_message_ws(diff(3).as_bytes()).unwrap_err();
    assert!(matches!(
        err,
        StreamStateError::BufferOverflow { limit: 2, .. }
    ));
}
