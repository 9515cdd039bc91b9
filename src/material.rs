use nalgebra::{Matrix3, SMatrix, Vector6};

use crate::error::AutoboltError;

/// Linear isotropic elastic material
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaterialModel {
    youngs_modulus: f64,
    poisson_ratio: f64,
}

impl MaterialModel {
    /// Creates a material, rejecting moduli outside the physical range
    /// (`E > 0`, `-1 < nu < 0.5`)
    pub fn new(youngs_modulus: f64, poisson_ratio: f64) -> Result<MaterialModel, AutoboltError> {
        if !youngs_modulus.is_finite() || youngs_modulus <= 0.0 {
            return Err(AutoboltError::InvalidParameter(format!(
                "elastic modulus must be positive, got {youngs_modulus}"
            )));
        }
        if !(poisson_ratio > -1.0 && poisson_ratio < 0.5) {
            return Err(AutoboltError::InvalidParameter(format!(
                "poisson ratio must lie in (-1, 0.5), got {poisson_ratio}"
            )));
        }

        Ok(MaterialModel {
            youngs_modulus,
            poisson_ratio,
        })
    }

    pub fn youngs_modulus(&self) -> f64 {
        self.youngs_modulus
    }

    pub fn poisson_ratio(&self) -> f64 {
        self.poisson_ratio
    }

    /// Shear modulus, the second Lamé parameter
    pub fn mu(&self) -> f64 {
        self.youngs_modulus / (2.0 * (1.0 + self.poisson_ratio))
    }

    /// First Lamé parameter
    pub fn lambda(&self) -> f64 {
        let nu = self.poisson_ratio;
        self.youngs_modulus * nu / ((1.0 + nu) * (1.0 - 2.0 * nu))
    }

    /// Calculates the 6x6 stress-strain matrix in Voigt notation
    ///
    /// Component order is `[xx, yy, zz, yz, xz, xy]` with engineering shear
    /// strains, so the shear diagonal is `mu`.
    pub fn stress_strain_matrix(&self) -> SMatrix<f64, 6, 6> {
        let mu = self.mu();
        let lambda = self.lambda();

        let mut d: SMatrix<f64, 6, 6> = SMatrix::zeros();
        for i in 0..3 {
            for j in 0..3 {
                d[(i, j)] = lambda;
            }
            d[(i, i)] = lambda + 2.0 * mu;
            d[(i + 3, i + 3)] = mu;
        }

        d
    }

    /// Applies `sigma = 2 mu eps + lambda tr(eps) I` to a symmetric strain
    /// tensor
    pub fn stress(&self, strain: &Matrix3<f64>) -> Matrix3<f64> {
        strain * (2.0 * self.mu()) + Matrix3::identity() * (self.lambda() * strain.trace())
    }
}

/// Expands a Voigt stress vector `[xx, yy, zz, yz, xz, xy]` into a tensor
pub fn voigt_to_tensor(v: &Vector6<f64>) -> Matrix3<f64> {
    Matrix3::new(
        v[0], v[5], v[4], //
        v[5], v[1], v[3], //
        v[4], v[3], v[2],
    )
}
