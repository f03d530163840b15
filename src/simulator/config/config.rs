use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;

use crate::arch::gemm::format::ElemFormat;
use crate::arch::gemm::job::{BufferLayout, GemmShape};
use crate::arch::gemm::params::ArrayGeometry;
use crate::simulator::sim::mode::{SimConfig, StepMode};

const DEFAULT_CONFIG: &str = include_str!("default.toml");

/// Prefix of environment overrides, e.g. `GEMM_JOB__M=48`.
pub const ENV_PREFIX: &str = "GEMM";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct AcceleratorSection {
  pub array_height: usize,
  pub pipe_regs: usize,
  pub format: ElemFormat,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct MemorySection {
  pub base: u32,
  pub size: u32,
  #[serde(default)]
  pub latency: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct JobSection {
  pub m: usize,
  pub n: usize,
  pub k: usize,
  #[serde(default)]
  pub seed: u64,
  #[serde(default)]
  pub guard_bytes: u32,
  // Explicit buffer addresses; unset ones follow the packed layout
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub x_addr: Option<u32>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub w_addr: Option<u32>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub y_addr: Option<u32>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub z_addr: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SimulationSection {
  #[serde(default)]
  pub quiet: bool,
  #[serde(default)]
  pub step_mode: bool,
  #[serde(default)]
  pub trace_file: String,
  #[serde(default = "default_max_steps")]
  pub max_steps: u64,
}

fn default_max_steps() -> u64 {
  1_000_000
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct AppConfig {
  pub accelerator: AcceleratorSection,
  pub memory: MemorySection,
  pub job: JobSection,
  pub simulation: SimulationSection,
}

impl AppConfig {
  /// The embedded `default.toml` without file or environment overrides.
  pub fn embedded() -> io::Result<Self> {
    toml::from_str(DEFAULT_CONFIG).map_err(|e| invalid(format!("embedded default.toml is invalid: {}", e)))
  }

  pub fn geometry(&self) -> io::Result<ArrayGeometry> {
    let acc = &self.accelerator;
    ArrayGeometry::new(acc.array_height, acc.pipe_regs, acc.format).map_err(|e| invalid(e.to_string()))
  }

  pub fn shape(&self) -> GemmShape {
    GemmShape {
      m: self.job.m,
      n: self.job.n,
      k: self.job.k,
    }
  }

  pub fn layout(&self) -> io::Result<BufferLayout> {
    let shape = self.shape();
    let packed = BufferLayout::packed(
      self.memory.base,
      shape,
      self.accelerator.format.bytes(),
      self.job.guard_bytes,
    )
    .ok_or_else(|| {
      invalid(format!(
        "{}x{}x{} job starting at {:#x} does not fit a 32-bit address space",
        shape.m, shape.n, shape.k, self.memory.base
      ))
    })?;
    Ok(BufferLayout {
      x_addr: self.job.x_addr.unwrap_or(packed.x_addr),
      w_addr: self.job.w_addr.unwrap_or(packed.w_addr),
      y_addr: self.job.y_addr.unwrap_or(packed.y_addr),
      z_addr: self.job.z_addr.unwrap_or(packed.z_addr),
      ..packed
    })
  }

  pub fn sim_config(&self) -> SimConfig {
    SimConfig {
      quiet: self.simulation.quiet,
      step_mode: if self.simulation.step_mode {
        StepMode::Step
      } else {
        StepMode::Continuous
      },
      trace_file: Some(self.simulation.trace_file.clone()).filter(|f| !f.is_empty()),
      max_steps: self.simulation.max_steps,
    }
  }

  pub fn to_toml(&self) -> io::Result<String> {
    toml::to_string_pretty(self).map_err(|e| invalid(format!("cannot render configuration: {}", e)))
  }
}

/// Command-line values that take precedence over files and environment.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
  pub quiet: bool,
  pub step: bool,
  pub trace_file: Option<String>,
  pub array_height: Option<usize>,
  pub pipe_regs: Option<usize>,
  pub format: Option<ElemFormat>,
  pub m: Option<usize>,
  pub n: Option<usize>,
  pub k: Option<usize>,
  pub seed: Option<u64>,
  pub latency: Option<u64>,
}

fn invalid(msg: String) -> io::Error {
  io::Error::new(io::ErrorKind::InvalidData, msg)
}

/// Load the embedded defaults, then `path` if given, then `GEMM_*`
/// environment variables.
pub fn load_config(path: Option<&Path>) -> io::Result<AppConfig> {
  let mut builder = Config::builder().add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml));
  if let Some(path) = path {
    builder = builder.add_source(File::from(path).format(FileFormat::Toml));
  }
  builder = builder.add_source(
    Environment::with_prefix(ENV_PREFIX)
      .prefix_separator("_")
      .separator("__")
      .try_parsing(true),
  );

  builder
    .build()
    .and_then(|c| c.try_deserialize::<AppConfig>())
    .map_err(|e| invalid(format!("failed to load configuration: {}", e)))
}

pub fn apply_cli_overrides(config: &mut AppConfig, cli: &CliOverrides) {
  if cli.quiet {
    config.simulation.quiet = true;
  }
  if cli.step {
    config.simulation.step_mode = true;
  }
  if let Some(file) = &cli.trace_file {
    config.simulation.trace_file = file.clone();
  }
  if let Some(v) = cli.array_height {
    config.accelerator.array_height = v;
  }
  if let Some(v) = cli.pipe_regs {
    config.accelerator.pipe_regs = v;
  }
  if let Some(v) = cli.format {
    config.accelerator.format = v;
  }
  if let Some(v) = cli.m {
    config.job.m = v;
  }
  if let Some(v) = cli.n {
    config.job.n = v;
  }
  if let Some(v) = cli.k {
    config.job.k = v;
  }
  if let Some(v) = cli.seed {
    config.job.seed = v;
  }
  if let Some(v) = cli.latency {
    config.memory.latency = v;
  }
}

pub fn validate_config(config: &AppConfig) -> io::Result<()> {
  let geometry = config.geometry()?;

  let job = &config.job;
  if job.m == 0 || job.n == 0 || job.k == 0 {
    return Err(invalid(format!("job dimensions must be non-zero, got {}x{}x{}", job.m, job.n, job.k)));
  }
  let l = geometry.array_width();
  let (row_tiles, col_tiles, w_col_tiles) = (job.m.div_ceil(l), job.n.div_ceil(l), job.k.div_ceil(l));
  if row_tiles > 0xFFFF || col_tiles > 0xFFFF || w_col_tiles > 0xFFFF {
    return Err(invalid("tile counts do not fit the 16-bit iteration fields".to_string()));
  }
  // beat counts programmed into the 32-bit length registers
  let lengths = [
    (l * col_tiles) as u64 * row_tiles as u64,
    (job.n * w_col_tiles) as u64 * row_tiles as u64,
    (l * w_col_tiles) as u64 * row_tiles as u64,
  ];
  if lengths.iter().any(|&len| len > u32::MAX as u64) {
    return Err(invalid("stream lengths do not fit the 32-bit length registers".to_string()));
  }

  let mem = &config.memory;
  let mem_end = mem.base as u64 + mem.size as u64;
  if mem.size == 0 || mem_end > u32::MAX as u64 + 1 {
    return Err(invalid(format!("memory {:#x}+{:#x} does not fit a 32-bit address space", mem.base, mem.size)));
  }

  let layout = config.layout()?;
  let shape = config.shape();
  let regions = [
    ("x", layout.x_addr, layout.x_pitch as u64 * shape.m as u64),
    ("w", layout.w_addr, layout.w_pitch as u64 * shape.n as u64),
    ("y", layout.y_addr, layout.yz_pitch as u64 * shape.m as u64),
    ("z", layout.z_addr, layout.yz_pitch as u64 * shape.m as u64),
  ];
  for (name, addr, len) in regions {
    let end = addr as u64 + len;
    if (addr as u64) < mem.base as u64 || end > mem_end {
      return Err(invalid(format!(
        "{} buffer {:#x}..{:#x} lies outside memory {:#x}..{:#x}",
        name, addr, end, mem.base, mem_end
      )));
    }
  }
  Ok(())
}

/// Load and merge configurations
///
/// 1. Embedded defaults
/// 2. Custom configuration file, if provided
/// 3. `GEMM_*` environment variables
/// 4. CLI overrides
/// 5. Validation
pub fn load_and_merge_configs(custom_config_path: Option<&Path>, cli: &CliOverrides) -> io::Result<AppConfig> {
  let mut config = load_config(custom_config_path)?;
  apply_cli_overrides(&mut config, cli);
  validate_config(&config)?;
  Ok(config)
}
