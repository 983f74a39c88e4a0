mod exec;

pub(crate) use exec::ArmHandler;
