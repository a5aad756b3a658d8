//! Property tests for the tilt and mode invariants.

use pergola_controller::tracking::{choose, ldr_estimate};
use pergola_controller::{actuator_positions, Angles, Mode, ModeStateMachine, MAX_TILT};
use pergola_hardware::LdrReadings;
use proptest::prelude::*;

fn tilt() -> impl Strategy<Value = f64> {
    -50.0..=50.0f64
}

fn readings() -> impl Strategy<Value = LdrReadings> {
    (0u16..=1023, 0u16..=1023, 0u16..=1023, 0u16..=1023)
        .prop_map(|(f, r, b, l)| LdrReadings::new(f, r, b, l))
}

fn manual_machine() -> ModeStateMachine {
    let mut machine = ModeStateMachine::new(300);
    machine.sensor_tick(LdrReadings::new(500, 500, 500, 500), None);
    machine.set_mode(Mode::Manual, None);
    machine
}

proptest! {
    #[test]
    fn test_actuator_positions_stay_in_range(h in tilt(), v in tilt()) {
        let positions = actuator_positions(Angles { horizontal: h, vertical: v });
        for position in positions.as_array() {
            prop_assert!(position <= 180);
        }
    }

    #[test]
    fn test_opposite_actuators_mirror_each_other(h in tilt(), v in tilt()) {
        let [front, right, back, left] =
            actuator_positions(Angles::new(h, v)).as_array().map(u16::from);
        prop_assert!((179..=180).contains(&(front + back)));
        prop_assert!((179..=180).contains(&(right + left)));
    }

    #[test]
    fn test_new_angles_are_clamped(h in -1000.0..1000.0f64, v in -1000.0..1000.0f64) {
        let angles = Angles::new(h, v);
        prop_assert!(angles.horizontal.abs() <= MAX_TILT);
        prop_assert!(angles.vertical.abs() <= MAX_TILT);
    }

    #[test]
    fn test_chosen_target_is_within_tilt_range(
        readings in readings(),
        astro_h in tilt(),
        astro_v in tilt(),
        with_astro in any::<bool>(),
    ) {
        let astro = with_astro.then(|| Angles::new(astro_h, astro_v));
        let decision = choose(ldr_estimate(&readings), astro);
        prop_assert!(decision.angles.horizontal.abs() <= MAX_TILT);
        prop_assert!(decision.angles.vertical.abs() <= MAX_TILT);
    }

    #[test]
    fn test_set_angles_is_idempotent(h in tilt(), v in tilt()) {
        let mut machine = manual_machine();

        let first = machine.set_angles(h, v).expect("manual mode accepts angles");
        let state = machine.state().clone();
        let second = machine.set_angles(h, v).expect("manual mode accepts angles");

        prop_assert_eq!(first, second);
        prop_assert_eq!(machine.state(), &state);
    }

    #[test]
    fn test_set_angles_outside_manual_never_changes_state(
        h in tilt(),
        v in tilt(),
        mode in prop_oneof![Just(Mode::Auto), Just(Mode::Off)],
    ) {
        let mut machine = manual_machine();
        machine.set_mode(mode, None);
        let before = machine.state().clone();

        prop_assert!(machine.set_angles(h, v).is_err());
        prop_assert_eq!(machine.state(), &before);
    }

    #[test]
    fn test_reported_lux_drives_night_mode(level in 0u16..=1023) {
        let mut machine = manual_machine();
        let readings = LdrReadings::new(level, level, level, level);
        machine.sensor_tick(readings, None);

        let state = machine.state();
        prop_assert_eq!(state.night_mode_active(), readings.lux() < 300);
        if state.night_mode_active() {
            prop_assert_eq!(state.displayed_angles(), Angles::ZERO);
        }
    }
}
