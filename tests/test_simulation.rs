#[cfg(test)]
mod test_simulation {
    use approx::assert_relative_eq;
    use indexmap::IndexMap;
    use modelbase::{
        prelude::{
            make_protocol, Derived, IntegratorSettingsBuilder, Model, ModelError,
            PeroxideIntegrator, ProtocolStep, Reaction, Readout, Simulator,
        },
        ratefunctions,
    };
    use peroxide::fuga::RK4;
    use pretty_assertions::assert_eq;

    /// Michaelis-Menten conversion of substrate into product.
    ///
    /// The rate law is given as a parsed expression, the product readout as a native
    /// function.
    fn menten_model() -> Model {
        let mut model = Model::new();
        model
            .add_parameters([("vmax", 10.0), ("km", 100.0)])
            .unwrap()
            .add_variables([("substrate", 100.0), ("product", 0.0)])
            .unwrap()
            .add_reaction(
                "v1",
                Reaction::from_expression(
                    "vmax * substrate / (km + substrate)",
                    [("substrate", -1.0), ("product", 1.0)],
                )
                .unwrap(),
            )
            .unwrap()
            .add_readout(
                "total",
                Readout::new(|a: &[f64]| a[0] + a[1], &["substrate", "product"]),
            )
            .unwrap();
        model
    }

    /// Reference solution with a plain RK4 loop and a small fixed step.
    fn reference_substrate(t_end: f64, points: usize) -> Vec<f64> {
        let (vmax, km) = (10.0, 100.0);
        let rate = |s: f64| -vmax * s / (km + s);
        let h = 1e-3;
        let substeps = ((t_end / points as f64) / h).round() as usize;

        let mut s = 100.0;
        let mut values = vec![s];
        for _ in 0..points {
            for _ in 0..substeps {
                let k1 = rate(s);
                let k2 = rate(s + h / 2.0 * k1);
                let k3 = rate(s + h / 2.0 * k2);
                let k4 = rate(s + h * k3);
                s += h / 6.0 * (k1 + 2.0 * k2 + 2.0 * k3 + k4);
            }
            values.push(s);
        }
        values
    }

    #[test]
    fn test_menten_matches_reference() {
        // ARRANGE
        let expected = reference_substrate(10.0, 10);
        let mut sim = Simulator::new(menten_model(), None).unwrap();

        // ACT
        sim.simulate().t_end(10.0).steps(10).call().unwrap();

        // ASSERT
        let concs = sim.get_concs().unwrap();
        let substrate = concs.column("substrate").unwrap();
        for (expected, actual) in expected.iter().zip(substrate.iter()) {
            assert_relative_eq!(*expected, *actual, epsilon = 1e-4);
        }
    }

    #[test]
    fn test_expression_and_native_rate_laws_agree() {
        // ARRANGE
        let mut native = menten_model();
        native
            .update_reaction(
                "v1",
                Reaction::new(
                    ratefunctions::michaelis_menten,
                    &["substrate", "vmax", "km"],
                    [("substrate", -1.0), ("product", 1.0)],
                ),
            )
            .unwrap();

        // ACT
        let run = |model: Model| {
            let mut sim = Simulator::new(model, None).unwrap();
            sim.simulate_time_course(vec![0.0, 1.0, 5.0, 10.0]).unwrap();
            sim.get_results().unwrap().unwrap()
        };
        let parsed = run(menten_model());
        let native = run(native);

        // ASSERT
        assert_eq!(parsed.columns(), native.columns());
        for (a, b) in parsed.data().iter().zip(native.data().iter()) {
            assert_relative_eq!(*a, *b, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_mass_is_conserved_in_readout() {
        // ARRANGE
        let mut sim = Simulator::new(menten_model(), None).unwrap();

        // ACT
        sim.simulate().t_end(20.0).call().unwrap();
        let full = sim.get_full_concs(true).unwrap().unwrap();

        // ASSERT
        assert_eq!(full.nrows(), 100);
        for total in full.column("total").unwrap() {
            assert_relative_eq!(*total, 100.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_derived_variable_in_full_concs() {
        // ARRANGE
        let mut model = menten_model();
        model
            .add_derived(
                "ratio",
                Derived::from_expression("product / (substrate + product)").unwrap(),
            )
            .unwrap();
        let y0 = IndexMap::from([("product".to_string(), 50.0)]);

        // ACT
        let mut sim = Simulator::new(model, Some(&y0)).unwrap();
        sim.simulate_time_course(vec![0.0, 1.0]).unwrap();
        let full = sim.get_full_concs(false).unwrap().unwrap();

        // ASSERT
        assert_eq!(full.columns(), &["substrate", "product", "ratio"]);
        assert_relative_eq!(full.get(0, "ratio").unwrap(), 50.0 / 150.0);
    }

    #[test]
    fn test_protocol_switches_enzyme_off() {
        // ARRANGE
        let protocol = make_protocol([
            ProtocolStep::new(5.0, [("vmax", 10.0)]),
            ProtocolStep::new(5.0, [("vmax", 0.0)]),
        ])
        .unwrap();
        let mut sim = Simulator::new(menten_model(), None).unwrap();

        // ACT
        sim.simulate_over_protocol(&protocol, 10).unwrap();

        // ASSERT
        let concs = sim.get_concs().unwrap();
        let at_switch = concs.get(10, "substrate").unwrap();
        let at_end = concs.get(20, "substrate").unwrap();
        assert!(at_switch < 100.0);
        assert_relative_eq!(at_switch, at_end);

        let parameters = sim.get_simulation_parameters().unwrap();
        assert_eq!(parameters.len(), 2);
        assert_relative_eq!(parameters[1]["vmax"], 0.0);
    }

    #[test]
    fn test_custom_integrator_settings() {
        // ARRANGE
        let settings = IntegratorSettingsBuilder::default()
            .max_step(0.1)
            .default_points(11)
            .build()
            .unwrap();
        let integrator = PeroxideIntegrator::new(RK4, settings);

        // ACT
        let mut sim = Simulator::with_integrator(menten_model(), None, integrator).unwrap();
        sim.simulate().t_end(10.0).call().unwrap();

        // ASSERT
        let time = sim.get_time().unwrap();
        assert_eq!(time.len(), 11);
        assert_relative_eq!(time[10], 10.0);
    }

    #[test]
    fn test_steady_state_continues_from_new_y0() {
        // ARRANGE
        let mut model = menten_model();
        model
            .add_parameter("k_in", 5.0)
            .unwrap()
            .add_reaction(
                "v_in",
                Reaction::new(ratefunctions::constant, &["k_in"], [("substrate", 1.0)]),
            )
            .unwrap()
            .add_parameter("k_out", 1.0)
            .unwrap()
            .add_reaction(
                "v_out",
                Reaction::new(
                    ratefunctions::mass_action_1,
                    &["product", "k_out"],
                    [("product", -1.0)],
                ),
            )
            .unwrap();

        // ACT
        let mut sim = Simulator::new(model.clone(), None).unwrap();
        sim.simulate_to_steady_state().call().unwrap();
        let y_ss = sim.get_new_y0().unwrap();

        // ASSERT
        // v1 = k_in at steady state: vmax * s / (km + s) = 5 -> s = km
        assert_relative_eq!(y_ss["substrate"], 100.0, epsilon = 1e-3);
        assert_relative_eq!(y_ss["product"], 5.0, epsilon = 1e-3);

        let mut follow_up = Simulator::new(model, Some(&y_ss)).unwrap();
        follow_up.simulate().t_end(1.0).call().unwrap();
        let concs = follow_up.get_concs().unwrap();
        assert_relative_eq!(
            concs.get(concs.nrows() - 1, "product").unwrap(),
            5.0,
            epsilon = 1e-3
        );
    }

    #[test]
    fn test_rate_law_with_missing_argument_is_rejected() {
        // ARRANGE
        let mut model = Model::new();
        model
            .add_parameters([("vmax", 1.0), ("km", 1.0)])
            .unwrap()
            .add_variable("s", 1.0)
            .unwrap();

        // ACT
        let result = model.add_reaction(
            "v1",
            Reaction::new(ratefunctions::michaelis_menten, &["s", "vmax"], [("s", -1.0)]),
        );

        // ASSERT
        assert!(matches!(
            result,
            Err(ModelError::ArityMismatch {
                expected: 3,
                actual: 2,
                ..
            })
        ));
        assert!(model.get_fluxes(model.get_variables(), 0.0).unwrap().is_empty());
    }

    #[test]
    fn test_configured_steady_state_tolerance() {
        // ARRANGE
        let settings = |tolerance: f64| {
            IntegratorSettingsBuilder::default()
                .steady_state_step_size(1.0)
                .steady_state_max_steps(3usize)
                .steady_state_tolerance(tolerance)
                .build()
                .unwrap()
        };
        let run = |tolerance: f64| {
            let integrator = PeroxideIntegrator::new(RK4, settings(tolerance));
            let mut sim = Simulator::with_integrator(menten_model(), None, integrator).unwrap();
            sim.simulate_to_steady_state().call().unwrap();
            sim.get_concs()
        };

        // ACT
        let loose = run(100.0);
        let strict = run(1e-6);

        // ASSERT
        assert_eq!(loose.map(|c| c.nrows()), Some(1));
        assert!(strict.is_none());
    }
}
