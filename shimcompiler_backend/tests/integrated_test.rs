use maplit::btreemap;
use rstest::rstest;

use shimcompiler_backend::*;
use shimcompiler_backend::simulated::{SimulatedBoards, SimulatedChannel};

fn configured(msg: &str) -> ScheduleModel {
    let mut sched = ScheduleModel::new(ScheduleLimits::default());
    sched.apply(&msg.parse().unwrap()).unwrap();
    sched
}

#[test]
fn documented_schedule_example() {
    let sched = configured("c1|b2|l2|l3|r2|r1");
    assert_eq!(sched.transitions(), &[4, 7]);
    assert_eq!(sched.base(), &[2, 5]);

    let expected = btreemap! {
        3 => Some(BlockPosition { block: 0, rep: 1 }),
        4 => Some(BlockPosition { block: 1, rep: 0 }),
        6 => Some(BlockPosition { block: 1, rep: 2 }),
        7 => None,
    };
    for (iteration, pos) in expected {
        assert_eq!(sched.resolve(iteration), pos, "iteration {iteration}");
    }
}

#[test]
fn documented_control_message() {
    let config: ScheduleConfig = "c2|b2|l4|l3|r2|r1".parse().unwrap();
    assert_eq!(config.channel_count(), 2);
    assert_eq!(config.lengths(), vec![4, 3]);
    assert_eq!(config.repeat_counts(), vec![2, 1]);

    let sched = configured("c2|b2|l4|l3|r2|r1");
    assert_eq!(sched.transitions(), &[8, 11]);
    assert_eq!(sched.base(), &[4, 7]);
    assert_eq!(sched.total_coefficients(), 14);
}

#[rstest]
#[case("c1|b1|l1|r1")]
#[case("c2|b2|l2|l3|r2|r1")]
#[case("c16|b3|l10|l20|l30|r5|r0|r2")]
#[case("c3|b9|l1|l2|l3|l4|l5|l6|l7|l8|l9|r9|r8|r7|r6|r5|r4|r3|r2|r1")]
fn every_iteration_resolves_once(#[case] msg: &str) {
    let sched = configured(msg);
    for iteration in 0..sched.total_iterations() {
        let pos = sched
            .resolve(iteration)
            .unwrap_or_else(|| panic!("iteration {iteration} exhausted early"));
        assert!(pos.rep < sched.lengths()[pos.block]);
        let start = if pos.block == 0 {
            0
        } else {
            sched.transitions()[pos.block - 1]
        };
        assert!(start <= iteration && iteration < sched.transitions()[pos.block]);
        for channel in 0..sched.channel_count() {
            assert!(sched.coefficient_offset(channel, pos.block, pos.rep) < sched.total_coefficients());
        }
    }
    assert_eq!(sched.resolve(sched.total_iterations()), None);
}

#[rstest]
#[case("c2|b2|l2|l3|r2|r1")]
#[case("c1|b4|l1|l7|l2|l5|r3|r1|r4|r2")]
fn boundary_iterations_switch_blocks(#[case] msg: &str) {
    let sched = configured(msg);
    for (i, &t) in sched.transitions().iter().enumerate() {
        assert_eq!(sched.block_index_for(t - 1), Some(i));
        let next = (i + 1 < sched.block_count()).then_some(i + 1);
        assert_eq!(sched.block_index_for(t), next);
    }
}

#[test]
fn rejected_message_keeps_schedule() {
    let mut sched = configured("c2|b2|l2|l3|r2|r1");
    // Syntax error never reaches the model.
    assert!("c2|b2|l2|r2|r1".parse::<ScheduleConfig>().is_err());
    // Semantic error is rejected by the model.
    let too_big: ScheduleConfig = "c16|b1|l1000|r1".parse().unwrap();
    assert!(matches!(
        sched.apply(&too_big),
        Err(ConfigurationError::CapacityExceeded { .. })
    ));
    assert_eq!(sched.transitions(), &[4, 7]);
    assert_eq!(sched.channel_count(), 2);
}

#[test]
fn payload_drives_expected_waveform() {
    let sched = configured("c2|b2|l2|l1|r2|r3");
    // Two channels, three samples: channel 1 mirrors channel 0 with opposite sign.
    let values = vec![0.1f32, -0.1, 0.2, -0.2, 0.3, -0.3];
    let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
    let store =
        CoefficientStore::from_bytes(&bytes, sched.channel_count(), sched.total_samples(), Endianness::Little)
            .unwrap();

    let wave = sched.render_waveform(&store, 0, sched.total_iterations());
    assert_eq!(wave.row(0).to_vec(), vec![0.1, 0.2, 0.1, 0.2, 0.3, 0.3, 0.3]);
    assert_eq!(wave.row(1).to_vec(), vec![-0.1, -0.2, -0.1, -0.2, -0.3, -0.3, -0.3]);
}

#[test]
fn calibration_then_playback_codes() {
    let conversion = Conversion::default();
    let params = CalibrationParams::default();
    let mut engine = CalibrationEngine::new(1, 2, params, conversion.clone());

    let mut channels = vec![SimulatedChannel::new(-1.62, 0.02); 2];
    channels[1] = SimulatedChannel::disconnected();
    let mut bus = BoardSelector::new(SimulatedBoards::new(vec![channels], conversion.clone()));
    let mut settle = ElapsedSettle::default();

    let report = engine.calibrate_all(&mut bus, &mut settle);
    assert_eq!(report.calibrated_count(), 1);
    assert!(matches!(
        report.results[1].1,
        Err(CalibrationError::GainOutOfBand { .. })
    ));

    let good = ChannelAddress::new(0, 0);
    assert!(engine.channel(good).unwrap().is_calibrated());
    assert!(!engine.channel(ChannelAddress::new(0, 1)).unwrap().is_calibrated());

    // A calibrated channel driven to 0.3 A reads back 0.3 A within ADC resolution.
    let code = engine.code_for_amps(good, 0.3).unwrap();
    bus.write(good, code, WriteMode::WriteAndUpdate);
    let amps = conversion.readback_amps(bus.read(good, 1));
    assert!((amps - 0.3).abs() < 3e-3, "read back {amps}");
}

#[test]
fn config_limits_apply_to_schedule() {
    let cfg = ShimConfig::from_toml_str("[limits]\nmax_blocks = 2\n").unwrap();
    let mut sched = ScheduleModel::new(cfg.effective_limits());
    let config: ScheduleConfig = "c1|b3|l1|l1|l1|r1|r1|r1".parse().unwrap();
    assert_eq!(
        sched.apply(&config),
        Err(ConfigurationError::TooManyBlocks { count: 3, max: 2 })
    );
}
