//! Butcher tableaux for the supplied Runge–Kutta methods.

/// Coefficients of an explicit Runge–Kutta method.
///
/// `matrix` is strictly lower triangular (row k holds the k coefficients
/// `a_{k,0} … a_{k,k-1}`). `error_weights` is the embedded lower-order row
/// b̂; its presence is what makes a method usable for adaptive stepping.
#[derive(Debug, Clone)]
pub struct ButcherTableau {
    pub stages: usize,
    pub nodes: Vec<f64>,
    pub matrix: Vec<Vec<f64>>,
    pub weights: Vec<f64>,
    pub error_weights: Option<Vec<f64>>,
}

impl ButcherTableau {
    /// Whether the tableau carries an embedded error estimator.
    pub fn is_adaptive(&self) -> bool {
        self.error_weights.is_some()
    }
}

/// Forward Euler: one stage, first order.
pub fn euler() -> ButcherTableau {
    ButcherTableau {
        stages: 1,
        nodes: vec![0.0],
        matrix: vec![vec![]],
        weights: vec![1.0],
        error_weights: None,
    }
}

/// Classic fourth-order Runge–Kutta.
pub fn rk4() -> ButcherTableau {
    ButcherTableau {
        stages: 4,
        nodes: vec![0.0, 0.5, 0.5, 1.0],
        matrix: vec![vec![], vec![0.5], vec![0.0, 0.5], vec![0.0, 0.0, 1.0]],
        weights: vec![1.0 / 6.0, 1.0 / 3.0, 1.0 / 3.0, 1.0 / 6.0],
        error_weights: None,
    }
}

/// Runge–Kutta–Fehlberg 4(5): six stages, fifth-order solution with an
/// embedded fourth-order error estimator.
pub fn fehlberg45() -> ButcherTableau {
    ButcherTableau {
        stages: 6,
        nodes: vec![0.0, 1.0 / 4.0, 3.0 / 8.0, 12.0 / 13.0, 1.0, 1.0 / 2.0],
        matrix: vec![
            vec![],
            vec![1.0 / 4.0],
            vec![3.0 / 32.0, 9.0 / 32.0],
            vec![1932.0 / 2197.0, -7200.0 / 2197.0, 7296.0 / 2197.0],
            vec![439.0 / 216.0, -8.0, 3680.0 / 513.0, -845.0 / 4104.0],
            vec![
                -8.0 / 27.0,
                2.0,
                -3544.0 / 2565.0,
                1859.0 / 4104.0,
                -11.0 / 40.0,
            ],
        ],
        weights: vec![
            16.0 / 135.0,
            0.0,
            6656.0 / 12825.0,
            28561.0 / 56430.0,
            -9.0 / 50.0,
            2.0 / 55.0,
        ],
        error_weights: Some(vec![
            25.0 / 216.0,
            0.0,
            1408.0 / 2565.0,
            2197.0 / 4104.0,
            -1.0 / 5.0,
            0.0,
        ]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_counts() {
        assert_eq!(euler().stages, 1);
        assert_eq!(rk4().stages, 4);
        assert_eq!(fehlberg45().stages, 6);
    }

    #[test]
    fn test_adaptivity_flags() {
        assert!(!euler().is_adaptive());
        assert!(!rk4().is_adaptive());
        assert!(fehlberg45().is_adaptive());
    }

    #[test]
    fn test_weights_sum_to_one() {
        for tableau in [euler(), rk4(), fehlberg45()] {
            let sum: f64 = tableau.weights.iter().sum();
            assert!((sum - 1.0).abs() < 1e-12, "{:?}", tableau.weights);
            if let Some(errw) = &tableau.error_weights {
                let sum: f64 = errw.iter().sum();
                assert!((sum - 1.0).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn test_nodes_match_row_sums() {
        // Consistency condition c_k = Σ_j a_{kj}.
        for tableau in [rk4(), fehlberg45()] {
            for (k, row) in tableau.matrix.iter().enumerate() {
                let sum: f64 = row.iter().sum();
                assert!(
                    (sum - tableau.nodes[k]).abs() < 1e-12,
                    "stage {} of a {}-stage method",
                    k,
                    tableau.stages
                );
            }
        }
    }

    #[test]
    fn test_matrix_is_strictly_lower_triangular() {
        for tableau in [euler(), rk4(), fehlberg45()] {
            assert_eq!(tableau.matrix.len(), tableau.stages);
            for (k, row) in tableau.matrix.iter().enumerate() {
                assert!(row.len() <= k);
            }
        }
    }
}
