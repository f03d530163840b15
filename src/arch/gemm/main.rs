use sim::models::Model;
use sim::simulator::{Connector, Simulation};

use super::accel::{GemmAccel, IRQ_PORT, REG_RESP_PORT};
use super::mem_port::SharedPort;
use super::params::ArrayGeometry;
use crate::simulator::host::{Host, IRQ_IN_PORT, REG_RESP_IN_PORT};

pub const GEMM_MODEL: &str = "gemm";
pub const HOST_MODEL: &str = "host";

pub fn create_simulation(geometry: ArrayGeometry, port: SharedPort) -> Simulation {
  let models = vec![
    Model::new(String::from(GEMM_MODEL), Box::new(GemmAccel::new(geometry, port))),
    Model::new(String::from(HOST_MODEL), Box::new(Host::new())),
  ];

  // Register requests are injected straight into gemm:reg_req
  let connectors = vec![
    Connector::new(
      String::from("gemm_host_irq"),
      String::from(GEMM_MODEL),
      String::from(HOST_MODEL),
      String::from(IRQ_PORT),
      String::from(IRQ_IN_PORT),
    ),
    Connector::new(
      String::from("gemm_host_reg_resp"),
      String::from(GEMM_MODEL),
      String::from(HOST_MODEL),
      String::from(REG_RESP_PORT),
      String::from(REG_RESP_IN_PORT),
    ),
  ];

  Simulation::post(models, connectors)
}
