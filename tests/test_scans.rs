#[cfg(test)]
mod test_scans {
    use std::{
        collections::HashMap,
        sync::{Arc, Mutex},
    };

    use approx::assert_relative_eq;
    use indexmap::IndexMap;
    use modelbase::{
        frame::Index,
        prelude::{
            Cache, InitialConditions, Model, ParallelSettings, ParallelSettingsBuilder,
            ParameterTable, PeroxideIntegrator, Reaction, ScanError, SimulationError, TimePoint,
        },
        ratefunctions, scan,
        scan::workers::{IntegratorWorker, SteadyStateWorker},
    };
    use pretty_assertions::assert_eq;

    /// `x* = k_in / k_out`, `y* = x* / k_y`
    fn chain_model() -> Model {
        let _ = env_logger::builder().is_test(true).try_init();

        let mut model = Model::new();
        model
            .add_parameters([("k_in", 1.0), ("k_out", 1.0), ("k_y", 2.0)])
            .unwrap()
            .add_variables([("x", 0.0), ("y", 0.0)])
            .unwrap()
            .add_reaction(
                "v_in",
                Reaction::new(ratefunctions::constant, &["k_in"], [("x", 1.0)]),
            )
            .unwrap()
            .add_reaction(
                "v_xy",
                Reaction::new(
                    ratefunctions::mass_action_1,
                    &["x", "k_out"],
                    [("x", -1.0), ("y", 1.0)],
                ),
            )
            .unwrap()
            .add_reaction(
                "v_out",
                Reaction::new(ratefunctions::mass_action_1, &["y", "k_y"], [("y", -1.0)]),
            )
            .unwrap();
        model
    }

    fn quiet() -> ParallelSettings {
        ParallelSettingsBuilder::default()
            .disable_progress(true)
            .build()
            .unwrap()
    }

    /// Fails the test if any parameter set is simulated twice.
    #[derive(Debug, Default)]
    struct CountingWorker {
        inner: IntegratorWorker<PeroxideIntegrator>,
        calls: Mutex<HashMap<u64, usize>>,
    }

    impl CountingWorker {
        fn total_calls(&self) -> usize {
            self.calls.lock().unwrap().values().sum()
        }
    }

    impl SteadyStateWorker for CountingWorker {
        fn steady_state(
            &self,
            model: Model,
            y0: Option<&InitialConditions>,
            rel_norm: bool,
        ) -> Result<TimePoint, SimulationError> {
            let key = model.get_parameters()["k_in"].to_bits();
            {
                let mut calls = self.calls.lock().unwrap();
                let count = calls.entry(key).or_default();
                *count += 1;
                assert!(*count == 1, "worker called twice for the same key");
            }
            self.inner.steady_state(model, y0, rel_norm)
        }
    }

    /// Refuses one specific parameter value.
    #[derive(Debug, Default)]
    struct FailingWorker {
        inner: IntegratorWorker<PeroxideIntegrator>,
    }

    impl SteadyStateWorker for FailingWorker {
        fn steady_state(
            &self,
            model: Model,
            y0: Option<&InitialConditions>,
            rel_norm: bool,
        ) -> Result<TimePoint, SimulationError> {
            if model.get_parameters()["k_in"] == 2.0 {
                return Err(SimulationError::Integration("division by zero".to_string()));
            }
            self.inner.steady_state(model, y0, rel_norm)
        }
    }

    /// Rejects one specific parameter value as if the model were broken.
    #[derive(Debug, Default)]
    struct MisconfiguredWorker {
        inner: IntegratorWorker<PeroxideIntegrator>,
    }

    impl SteadyStateWorker for MisconfiguredWorker {
        fn steady_state(
            &self,
            model: Model,
            y0: Option<&InitialConditions>,
            rel_norm: bool,
        ) -> Result<TimePoint, SimulationError> {
            if model.get_parameters()["k_in"] == 2.0 {
                return Err(SimulationError::InvalidInitialConditions(
                    "unknown variable z".to_string(),
                ));
            }
            self.inner.steady_state(model, y0, rel_norm)
        }
    }

    #[test]
    fn test_single_column_scan_index() {
        // ARRANGE
        let values = vec![3.0, 1.0, 2.0];
        let parameters =
            ParameterTable::from_columns(IndexMap::from([("k_in".to_string(), values.clone())]))
                .unwrap();

        // ACT
        let res = scan::steady_state()
            .model(&chain_model())
            .parameters(&parameters)
            .settings(quiet())
            .call()
            .unwrap();

        // ASSERT
        assert_eq!(
            res.concs.index(),
            &Index::Values {
                name: "k_in".to_string(),
                values: values.clone(),
            }
        );
        for (i, k_in) in values.iter().enumerate() {
            assert_relative_eq!(res.concs.get(i, "x").unwrap(), *k_in, epsilon = 1e-4);
            assert_relative_eq!(res.concs.get(i, "y").unwrap(), k_in / 2.0, epsilon = 1e-4);
        }
    }

    #[test]
    fn test_multi_column_scan_index() {
        // ARRANGE
        let parameters = ParameterTable::cartesian_product(IndexMap::from([
            ("k_in".to_string(), vec![1.0, 2.0]),
            ("k_y".to_string(), vec![1.0, 4.0]),
        ]));

        // ACT
        let res = scan::steady_state()
            .model(&chain_model())
            .parameters(&parameters)
            .settings(quiet())
            .call()
            .unwrap();

        // ASSERT
        assert_eq!(
            res.fluxes.index(),
            &Index::Tuples {
                names: vec!["k_in".to_string(), "k_y".to_string()],
                values: vec![
                    vec![1.0, 1.0],
                    vec![1.0, 4.0],
                    vec![2.0, 1.0],
                    vec![2.0, 4.0],
                ],
            }
        );
        assert_relative_eq!(res.concs.get(1, "y").unwrap(), 0.25, epsilon = 1e-4);
        assert_relative_eq!(res.fluxes.get(3, "v_out").unwrap(), 2.0, epsilon = 1e-4);
    }

    #[test]
    fn test_cache_skips_worker_on_second_run() {
        // ARRANGE
        let dir = tempfile::tempdir().unwrap();
        let settings = ParallelSettingsBuilder::default()
            .parallel(false)
            .disable_progress(true)
            .cache(Cache::new(dir.path()))
            .build()
            .unwrap();
        let parameters = ParameterTable::from_columns(IndexMap::from([(
            "k_in".to_string(),
            vec![1.0, 2.0, 3.0],
        )]))
        .unwrap();
        let worker = Arc::new(CountingWorker::default());
        let model = chain_model();

        // ACT
        let run = || {
            scan::steady_state()
                .model(&model)
                .parameters(&parameters)
                .settings(settings.clone())
                .worker(worker.clone())
                .call()
                .unwrap()
        };
        let first = run();
        let second = run();

        // ASSERT
        assert_eq!(worker.total_calls(), 3);
        assert_eq!(first.concs.index(), second.concs.index());
        for (a, b) in first.concs.data().iter().zip(second.concs.data().iter()) {
            assert_relative_eq!(*a, *b, epsilon = 1e-12);
        }
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 3);
    }

    #[test]
    fn test_parallel_and_sequential_agree() {
        // ARRANGE
        let parameters = ParameterTable::from_columns(IndexMap::from([(
            "k_out".to_string(),
            (1..=8).map(f64::from).collect(),
        )]))
        .unwrap();
        let model = chain_model();
        let time_points = [0.0, 0.5, 1.0, 2.0];

        // ACT
        let run = |settings: ParallelSettings| {
            scan::time_course()
                .model(&model)
                .parameters(&parameters)
                .time_points(&time_points)
                .settings(settings)
                .call()
                .unwrap()
        };
        let parallel = run(
            ParallelSettingsBuilder::default()
                .max_workers(4usize)
                .disable_progress(true)
                .build()
                .unwrap(),
        );
        let sequential = run(ParallelSettings::sequential());

        // ASSERT
        assert_eq!(parallel.concs, sequential.concs);
        assert_eq!(parallel.fluxes, sequential.fluxes);
    }

    #[test]
    fn test_failing_row_becomes_nan() {
        // ARRANGE
        let parameters = ParameterTable::from_columns(IndexMap::from([(
            "k_in".to_string(),
            vec![1.0, 2.0, 3.0],
        )]))
        .unwrap();

        // ACT
        let res = scan::steady_state()
            .model(&chain_model())
            .parameters(&parameters)
            .settings(quiet())
            .worker(Arc::new(FailingWorker::default()))
            .call()
            .unwrap();

        // ASSERT
        assert_eq!(res.concs.nrows(), 3);
        assert_eq!(res.concs.columns(), &["x", "y"]);
        assert!(res.concs.row(1).unwrap().iter().all(|v| v.is_nan()));
        assert!(res.fluxes.row(1).unwrap().iter().all(|v| v.is_nan()));
        assert_relative_eq!(res.concs.get(0, "x").unwrap(), 1.0, epsilon = 1e-4);
        assert_relative_eq!(res.concs.get(2, "x").unwrap(), 3.0, epsilon = 1e-4);
    }

    #[test]
    fn test_numerical_failure_keeps_shape() {
        // ARRANGE
        let mut model = chain_model();
        model
            .add_reaction(
                "v_bad",
                Reaction::new(|a: &[f64]| 1.0 / (a[0] - 2.0), &["k_in"], [("x", 1.0)]),
            )
            .unwrap();
        let parameters = ParameterTable::from_columns(IndexMap::from([(
            "k_in".to_string(),
            vec![1.0, 2.0],
        )]))
        .unwrap();

        // ACT
        let res = scan::time_course()
            .model(&model)
            .parameters(&parameters)
            .time_points(&[0.0, 1.0, 2.0])
            .settings(ParallelSettings::sequential())
            .call()
            .unwrap();

        // ASSERT
        assert_eq!(res.concs.nrows(), 6);
        let x = res.get_by_name("x").unwrap();
        assert!(x.column("1").unwrap().iter().all(|v| v.is_nan()));
        assert!(x.column("0").unwrap().iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_configuration_error_aborts_scan() {
        // ARRANGE
        let parameters = ParameterTable::from_columns(IndexMap::from([(
            "k_in".to_string(),
            vec![1.0, 2.0, 3.0],
        )]))
        .unwrap();

        // ACT
        let result = scan::steady_state()
            .model(&chain_model())
            .parameters(&parameters)
            .settings(quiet())
            .worker(Arc::new(MisconfiguredWorker::default()))
            .call();

        // ASSERT
        assert!(matches!(
            result,
            Err(ScanError::Simulation(
                SimulationError::InvalidInitialConditions(_)
            ))
        ));
    }

    #[test]
    fn test_malformed_time_points_are_rejected() {
        // ARRANGE
        let parameters =
            ParameterTable::from_columns(IndexMap::from([("k_in".to_string(), vec![1.0])]))
                .unwrap();
        let model = chain_model();

        // ACT
        let run = |time_points: &[f64]| {
            scan::time_course()
                .model(&model)
                .parameters(&parameters)
                .time_points(time_points)
                .settings(ParallelSettings::sequential())
                .call()
        };

        // ASSERT
        assert!(run(&[]).is_err());
        assert!(run(&[2.0, 1.0]).is_err());
        assert!(run(&[0.0, f64::INFINITY]).is_err());
    }

    #[test]
    fn test_numerical_failure_keeps_shape_with_late_start() {
        // ARRANGE
        let mut model = chain_model();
        model
            .add_reaction(
                "v_bad",
                Reaction::new(|a: &[f64]| 1.0 / (a[0] - 2.0), &["k_in"], [("x", 1.0)]),
            )
            .unwrap();
        let parameters = ParameterTable::from_columns(IndexMap::from([(
            "k_in".to_string(),
            vec![1.0, 2.0],
        )]))
        .unwrap();

        // ACT
        let res = scan::time_course()
            .model(&model)
            .parameters(&parameters)
            .time_points(&[1.0, 2.0])
            .settings(ParallelSettings::sequential())
            .call()
            .unwrap();

        // ASSERT
        assert_eq!(
            res.concs.index(),
            &Index::Nested {
                outer: vec![0, 0, 0, 1, 1, 1],
                inner: Box::new(Index::Time(vec![0.0, 1.0, 2.0, 0.0, 1.0, 2.0])),
            }
        );
        assert_eq!(res.fluxes.nrows(), 6);
        let x = res.get_by_name("x").unwrap();
        assert!(x.column("1").unwrap().iter().all(|v| v.is_nan()));
        assert!(x.column("0").unwrap().iter().all(|v| v.is_finite()));
    }
}
