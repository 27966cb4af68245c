pub mod maintenance_gate;
