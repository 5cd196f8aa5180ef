//! Reference kinetics: an adiabatic constant-volume ideal-gas reactor with first-order
//! Arrhenius steps, integrated by a two-stage Rosenbrock method.
//!
//! This stands in for a full reaction-mechanism library. Any other solver plugs into the
//! dispatcher through [`MechanismLoader`] and [`SolverContext`].
//!
//! Integrated state is `y = [T, Y_0 .. Y_{n-1}]` with density fixed by the initial state:
//!
//! ```text
//! ω_r              = A_r exp(-Ta_r / T) Y_reactant(r)
//! dY_reactant(r)/dt -= ω_r,  dY_product(r)/dt += ω_r
//! dT/dt            = -Σ_i u_i(T) dY_i/dt / c_v
//! u_i(T)           = u_i,ref + c_v,i (T - T_ref)
//! P                = ρ R T Σ_i Y_i / W_i
//! ```

use nalgebra::{DMatrix, DVector};

use crate::{IntegrationError, MechanismLoadError, MechanismLoader, SimulationState, SolverContext, Tolerances};

/// Universal gas constant, J/(kmol·K).
pub const GAS_CONSTANT: f64 = 8_314.462_618;
/// Temperature at which formation energies are given, K.
pub const REFERENCE_TEMPERATURE: f64 = 298.15;

const DEFAULT_MAX_STEPS: usize = 50_000;
// ROS2 (Verwer et al. 1999), L-stable.
const GAMMA: f64 = 1.0 + std::f64::consts::FRAC_1_SQRT_2;
const SAFETY: f64 = 0.9;
const MIN_FACTOR: f64 = 0.2;
const MAX_FACTOR: f64 = 5.0;
const REJECT_FACTOR: f64 = 0.25;
const MIN_STEP_FRACTION: f64 = 1e-14;
const ROUNDOFF: f64 = 1e-12;

#[derive(Clone, Debug, PartialEq)]
pub struct Species {
    pub name: String,
    /// kg/kmol
    pub molar_mass: f64,
    /// J/(kg·K)
    pub cv: f64,
    /// J/kg at [`REFERENCE_TEMPERATURE`]
    pub formation_energy: f64,
}

impl Species {
    pub fn new(name: impl Into<String>, molar_mass: f64, cv: f64, formation_energy: f64) -> Self {
        Self {
            name: name.into(),
            molar_mass,
            cv,
            formation_energy,
        }
    }

    #[inline]
    fn internal_energy(&self, temperature: f64) -> f64 {
        self.formation_energy + self.cv * (temperature - REFERENCE_TEMPERATURE)
    }
}

/// First-order irreversible step `reactant -> product`.
#[derive(Clone, Debug, PartialEq)]
pub struct Reaction {
    pub reactant: usize,
    pub product: usize,
    /// 1/s
    pub pre_exponential: f64,
    /// K
    pub activation_temperature: f64,
}

impl Reaction {
    #[inline]
    fn rate(&self, temperature: f64, fractions: &[f64]) -> f64 {
        self.pre_exponential * (-self.activation_temperature / temperature).exp() * fractions[self.reactant]
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Mechanism {
    pub name: String,
    pub species: Vec<Species>,
    pub reactions: Vec<Reaction>,
}

impl Mechanism {
    /// Resolves a built-in mechanism by name (case-insensitive).
    ///
    /// `inert` adapts to `species_count`; the others have a fixed species list.
    pub fn by_name(name: &str, species_count: usize) -> Result<Self, MechanismLoadError> {
        match name.trim().to_ascii_lowercase().as_str() {
            "inert" => Ok(Self::inert(species_count)),
            "isomerization" => Ok(Self::isomerization()),
            "two-step" | "two_step" => Ok(Self::two_step()),
            _ => Err(MechanismLoadError::Unknown(name.to_owned())),
        }
    }

    /// Air-like species, no reactions.
    pub fn inert(species_count: usize) -> Self {
        Self {
            name: "inert".into(),
            species: (0..species_count)
                .map(|idx| Species::new(format!("X{idx}"), 28.97, 718.0, 0.0))
                .collect(),
            reactions: Vec::new(),
        }
    }

    /// `A -> B`, releasing 800 kJ/kg.
    pub fn isomerization() -> Self {
        Self {
            name: "isomerization".into(),
            species: vec![
                Species::new("A", 30.0, 800.0, 0.0),
                Species::new("B", 30.0, 800.0, -8.0e5),
            ],
            reactions: vec![Reaction {
                reactant: 0,
                product: 1,
                pre_exponential: 1.0e9,
                activation_temperature: 18_000.0,
            }],
        }
    }

    /// `F -> I -> P`, with a slow initiation and a fast, strongly exothermic second step.
    pub fn two_step() -> Self {
        Self {
            name: "two-step".into(),
            species: vec![
                Species::new("F", 16.0, 1_100.0, 0.0),
                Species::new("I", 24.0, 950.0, -3.0e5),
                Species::new("P", 28.0, 850.0, -9.0e5),
            ],
            reactions: vec![
                Reaction {
                    reactant: 0,
                    product: 1,
                    pre_exponential: 5.0e8,
                    activation_temperature: 16_000.0,
                },
                Reaction {
                    reactant: 1,
                    product: 2,
                    pre_exponential: 2.0e10,
                    activation_temperature: 20_000.0,
                },
            ],
        }
    }

    pub fn species_count(&self) -> usize {
        self.species.len()
    }

    /// Rejects species data and reaction indices the right-hand side cannot evaluate.
    pub fn validate(&self) -> Result<(), MechanismLoadError> {
        let invalid = |msg: String| Err(MechanismLoadError::Invalid(format!("'{}': {msg}", self.name)));
        if self.species.is_empty() {
            return invalid("no species defined".into());
        }
        for species in &self.species {
            if !(species.molar_mass.is_finite() && species.molar_mass > 0.0) {
                return invalid(format!(
                    "species '{}' molar mass must be finite and positive, got {}",
                    species.name, species.molar_mass
                ));
            }
            if !(species.cv.is_finite() && species.cv > 0.0) {
                return invalid(format!(
                    "species '{}' heat capacity must be finite and positive, got {}",
                    species.name, species.cv
                ));
            }
            if !species.formation_energy.is_finite() {
                return invalid(format!(
                    "species '{}' formation energy must be finite, got {}",
                    species.name, species.formation_energy
                ));
            }
        }
        let n = self.species.len();
        for (idx, reaction) in self.reactions.iter().enumerate() {
            if reaction.reactant >= n || reaction.product >= n {
                return invalid(format!(
                    "reaction {idx} references species {} -> {} with only {n} defined",
                    reaction.reactant, reaction.product
                ));
            }
            if !reaction.pre_exponential.is_finite() {
                return invalid(format!(
                    "reaction {idx} pre-exponential factor must be finite, got {}",
                    reaction.pre_exponential
                ));
            }
            if !reaction.activation_temperature.is_finite() {
                return invalid(format!(
                    "reaction {idx} activation temperature must be finite, got {}",
                    reaction.activation_temperature
                ));
            }
        }
        Ok(())
    }

    /// `Σ Y_i / W_i`, kmol/kg.
    pub fn mean_inverse_molar_mass(&self, fractions: &[f64]) -> f64 {
        self.species
            .iter()
            .zip(fractions)
            .map(|(species, y)| y / species.molar_mass)
            .sum()
    }

    /// Writes `dy/dt` for `y = [T, Y..]`. Returns `false` when the state or its derivative
    /// is not physical (non-positive temperature or heat capacity, non-finite values).
    fn rhs(&self, y: &[f64], dy: &mut [f64]) -> bool {
        let temperature = y[0];
        if !(temperature.is_finite() && temperature > 0.0) {
            return false;
        }
        let fractions = &y[1..];
        dy.fill(0.0);
        for reaction in &self.reactions {
            let rate = reaction.rate(temperature, fractions);
            dy[1 + reaction.reactant] -= rate;
            dy[1 + reaction.product] += rate;
        }
        let cv: f64 = self
            .species
            .iter()
            .zip(fractions)
            .map(|(species, y)| species.cv * y)
            .sum();
        if !(cv > 0.0) {
            return false;
        }
        let energy_flux: f64 = self
            .species
            .iter()
            .zip(&dy[1..])
            .map(|(species, rate)| species.internal_energy(temperature) * rate)
            .sum();
        dy[0] = -energy_flux / cv;
        dy.iter().all(|v| v.is_finite())
    }
}

/// Builds [`ReferenceContext`]s for the built-in mechanisms.
#[derive(Clone, Copy, Debug)]
pub struct ReferenceKinetics {
    max_steps: usize,
}

impl Default for ReferenceKinetics {
    fn default() -> Self {
        Self {
            max_steps: DEFAULT_MAX_STEPS,
        }
    }
}

impl ReferenceKinetics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Caps attempted integrator steps per advance.
    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps.max(1);
        self
    }
}

impl MechanismLoader for ReferenceKinetics {
    type Context = ReferenceContext;

    fn load(&self, mechanism: &str, species_count: usize) -> Result<ReferenceContext, MechanismLoadError> {
        let resolved = Mechanism::by_name(mechanism, species_count)?;
        if resolved.species_count() != species_count {
            return Err(MechanismLoadError::SpeciesCount {
                mechanism: mechanism.to_owned(),
                expected: resolved.species_count(),
                found: species_count,
            });
        }
        ReferenceContext::new(resolved, self.max_steps)
    }
}

/// One reactor plus its integrator. Owns every buffer it touches.
#[derive(Clone, Debug)]
pub struct ReferenceContext {
    mechanism: Mechanism,
    tolerances: Tolerances,
    max_steps: usize,
    density: f64,
    time: f64,
    steps: usize,
    y: DVector<f64>,
    jacobian: DMatrix<f64>,
    f0: DVector<f64>,
    f1: DVector<f64>,
    output: Vec<f64>,
}

impl ReferenceContext {
    pub fn new(mechanism: Mechanism, max_steps: usize) -> Result<Self, MechanismLoadError> {
        mechanism.validate()?;
        let n = mechanism.species_count() + 1;
        let output = vec![0.0; mechanism.species_count() + crate::STATE_HEADER];
        Ok(Self {
            mechanism,
            tolerances: Tolerances::default(),
            max_steps,
            density: 0.0,
            time: 0.0,
            steps: 0,
            y: DVector::zeros(n),
            jacobian: DMatrix::zeros(n, n),
            f0: DVector::zeros(n),
            f1: DVector::zeros(n),
            output,
        })
    }

    pub fn mechanism(&self) -> &Mechanism {
        &self.mechanism
    }

    pub fn tolerances(&self) -> Tolerances {
        self.tolerances
    }

    /// Integrator clock after the last advance.
    pub fn time(&self) -> f64 {
        self.time
    }

    /// Accepted steps taken by the last advance.
    pub fn steps(&self) -> usize {
        self.steps
    }

    /// Loads `[T, P, Y..]` like a `set_TPY`: negative fractions are clipped and the rest
    /// normalized; density is fixed from the result.
    fn set_state(&mut self, state: SimulationState<'_>) -> Result<(), IntegrationError> {
        if state.species_count() != self.mechanism.species_count() {
            return Err(IntegrationError::InvalidState(format!(
                "state carries {} species, mechanism '{}' defines {}",
                state.species_count(),
                self.mechanism.name,
                self.mechanism.species_count()
            )));
        }
        let temperature = state.temperature();
        let pressure = state.pressure();
        if !(temperature.is_finite() && temperature > 0.0) {
            return Err(IntegrationError::InvalidState(format!(
                "temperature must be finite and positive, got {temperature}"
            )));
        }
        if !(pressure.is_finite() && pressure > 0.0) {
            return Err(IntegrationError::InvalidState(format!(
                "pressure must be finite and positive, got {pressure}"
            )));
        }
        let fractions = state.mass_fractions();
        if fractions.iter().any(|y| !y.is_finite()) {
            return Err(IntegrationError::InvalidState(
                "mass fractions must be finite".into(),
            ));
        }
        let total: f64 = fractions.iter().map(|y| y.max(0.0)).sum();
        if total <= 0.0 {
            return Err(IntegrationError::InvalidState(
                "mass fractions sum to zero".into(),
            ));
        }

        self.y[0] = temperature;
        for (dst, y) in self.y.iter_mut().skip(1).zip(fractions) {
            *dst = y.max(0.0) / total;
        }
        let inverse_molar_mass = self
            .mechanism
            .mean_inverse_molar_mass(&self.y.as_slice()[1..]);
        self.density = pressure / (GAS_CONSTANT * temperature * inverse_molar_mass);
        Ok(())
    }

    fn weighted_rms(&self, values: &DVector<f64>, reference: &DVector<f64>, other: &DVector<f64>) -> f64 {
        let Tolerances { relative, absolute } = self.tolerances;
        let sum: f64 = values
            .iter()
            .zip(reference.iter().zip(other.iter()))
            .map(|(v, (a, b))| {
                let scale = (absolute + relative * a.abs().max(b.abs())).max(f64::MIN_POSITIVE);
                (v / scale).powi(2)
            })
            .sum();
        (sum / values.len() as f64).sqrt()
    }

    fn initial_step(&self, span: f64) -> f64 {
        let d0 = self.weighted_rms(&self.y, &self.y, &self.y);
        let d1 = self.weighted_rms(&self.f0, &self.y, &self.y);
        let step = if d0 < 1e-5 || d1 < 1e-5 {
            1e-6
        } else {
            0.01 * d0 / d1
        };
        step.min(span)
    }

    fn update_jacobian(&mut self) -> bool {
        let n = self.y.len();
        for j in 0..n {
            let saved = self.y[j];
            let delta = f64::EPSILON.sqrt() * saved.abs().max(1.0);
            self.y[j] = saved + delta;
            let ok = self.mechanism.rhs(self.y.as_slice(), self.f1.as_mut_slice());
            self.y[j] = saved;
            if !ok {
                return false;
            }
            for i in 0..n {
                self.jacobian[(i, j)] = (self.f1[i] - self.f0[i]) / delta;
            }
        }
        true
    }

    /// Integrates from a zeroed clock to `span`.
    fn integrate(&mut self, span: f64) -> Result<(), IntegrationError> {
        let n = self.y.len();
        self.time = 0.0;
        self.steps = 0;
        if !self.mechanism.rhs(self.y.as_slice(), self.f0.as_mut_slice()) {
            return Err(IntegrationError::NonFinite { time: 0.0 });
        }

        let mut step = self.initial_step(span);
        let mut attempts = 0usize;
        let mut jacobian_current = false;
        let mut rejected = false;

        while span - self.time > ROUNDOFF * span {
            if attempts >= self.max_steps {
                return Err(IntegrationError::TooManySteps {
                    time: self.time,
                    steps: attempts,
                });
            }
            attempts += 1;

            let remaining = span - self.time;
            let last = step >= remaining;
            let h = if last { remaining } else { step };
            if h <= MIN_STEP_FRACTION * span {
                return Err(IntegrationError::StepSizeUnderflow {
                    time: self.time,
                    step: h,
                });
            }

            if !jacobian_current {
                if !self.update_jacobian() {
                    return Err(IntegrationError::NonFinite { time: self.time });
                }
                jacobian_current = true;
            }

            let iteration = DMatrix::<f64>::identity(n, n) - &self.jacobian * (GAMMA * h);
            let lu = iteration.lu();
            let time = self.time;
            let singular = || IntegrationError::SingularJacobian { time };
            let k1 = lu.solve(&self.f0).ok_or_else(singular)?;
            let stage = &self.y + &k1 * h;
            if !self.mechanism.rhs(stage.as_slice(), self.f1.as_mut_slice()) {
                step = h * REJECT_FACTOR;
                rejected = true;
                continue;
            }
            let k2 = lu.solve(&(&self.f1 - &k1 * 2.0)).ok_or_else(singular)?;
            let candidate = &self.y + &k1 * (1.5 * h) + &k2 * (0.5 * h);
            let estimate = (&k1 + &k2) * (0.5 * h);
            let error = self.weighted_rms(&estimate, &self.y, &candidate);

            if !error.is_finite() || error > 1.0 {
                let factor = if error.is_finite() {
                    (SAFETY / error.sqrt()).clamp(MIN_FACTOR, 1.0)
                } else {
                    REJECT_FACTOR
                };
                step = h * factor;
                rejected = true;
                continue;
            }
            if !self.mechanism.rhs(candidate.as_slice(), self.f1.as_mut_slice()) {
                step = h * REJECT_FACTOR;
                rejected = true;
                continue;
            }

            self.y = candidate;
            std::mem::swap(&mut self.f0, &mut self.f1);
            jacobian_current = false;
            self.steps += 1;
            self.time = if last { span } else { self.time + h };

            let mut factor = if error > 0.0 {
                (SAFETY / error.sqrt()).clamp(MIN_FACTOR, MAX_FACTOR)
            } else {
                MAX_FACTOR
            };
            if rejected {
                factor = factor.min(1.0);
            }
            rejected = false;
            step = h * factor;
        }
        self.time = span;
        Ok(())
    }

    fn write_output(&mut self) {
        let temperature = self.y[0];
        let fractions = &self.y.as_slice()[1..];
        let pressure = self.density
            * GAS_CONSTANT
            * temperature
            * self.mechanism.mean_inverse_molar_mass(fractions);
        self.output[0] = temperature;
        self.output[1] = pressure;
        self.output[crate::STATE_HEADER..].copy_from_slice(fractions);
    }
}

impl SolverContext for ReferenceContext {
    fn configure(&mut self, tolerances: Tolerances) {
        self.tolerances = tolerances;
    }

    fn advance(
        &mut self,
        state: SimulationState<'_>,
        dt: f64,
    ) -> Result<SimulationState<'_>, IntegrationError> {
        if !(dt.is_finite() && dt >= 0.0) {
            return Err(IntegrationError::InvalidState(format!(
                "time step must be finite and non-negative, got {dt}"
            )));
        }
        self.set_state(state)?;
        if dt > 0.0 {
            self.integrate(dt)?;
        } else {
            self.time = 0.0;
            self.steps = 0;
        }
        self.write_output();
        Ok(SimulationState::from_slot(&self.output))
    }
}
