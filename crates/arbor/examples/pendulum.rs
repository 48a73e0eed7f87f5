//! A free body held at one end by a coincident-station constraint: a
//! pendulum built the long way round, to exercise frames, projection and the
//! dynamics calls.
//!
//!   J         B          W
//!   *==-------*==--------o
//!    <- L/2 -> <- L/2 ->
//!
//! B is the body frame, J the joint frame on the body and W the point mass.
//! J is tied to the ground origin; gravity is along −y.

use arbor::{
    GROUND, JointKind, MassProperties, MultibodySystem, SimulationConfig, SpatialVec, Stage, State, Transform,
    Vec3, about,
    arbor_math::Mat3,
};

fn main() {
    if let Err(e) = run() {
        eprintln!("*** {e}");
        std::process::exit(1);
    }
}

fn run() -> arbor::Result<()> {
    let (major, minor, patch) = arbor::version();
    println!("==> arbor version: {major}.{minor}.{patch}");
    for key in arbor::about::KEYS {
        println!("      about({key})='{}'", about(key).unwrap_or(""));
    }

    let length = 5.0;
    let mass = 3.0;
    let config = SimulationConfig::pendulum();
    let gravity = config.gravity_vector();

    let joint_frame = Transform::from_translation(Vec3::new(-length / 2.0, 0.0, 0.0));
    let mprops = MassProperties::new(mass, Vec3::new(length / 2.0, 0.0, 0.0), Mat3::identity() * 1e-6);
    println!("mass properties: {mprops:?}");
    println!(
        "period should be {:.4} seconds.",
        2.0 * std::f64::consts::PI * (length / gravity.norm()).sqrt()
    );

    let mut system = MultibodySystem::new();
    let body = system.add_body(mprops, joint_frame, GROUND, Transform::identity(), JointKind::Free)?;
    system.add_coincident_stations_constraint(GROUND, Vec3::zeros(), body, joint_frame.pos)?;

    let mut state = State::new();
    system.realize(&mut state, Stage::Built)?;
    system.set_use_euler_angles(&mut state, config.rotation == arbor::RotationRepresentation::EulerAngles)?;
    system.realize(&mut state, Stage::Configured)?;
    println!("body frame: {}", system.body_configuration(&state, body)?);

    system.enforce_configuration_constraints(&mut state, &config.projection)?;
    system.realize(&mut state, Stage::Configured)?;
    println!("after assembly body frame: {}", system.body_configuration(&state, body)?);

    let mut de_dr = vec![SpatialVec::zero(); system.nbodies()];
    for f in de_dr.iter_mut().skip(1) {
        *f = SpatialVec::new(Vec3::zeros(), Vec3::new(0.0, 2.0, 0.0));
    }
    let de_dq = system.calc_internal_gradient_from_spatial(&state, &de_dr)?;
    println!("dE/dR = {de_dr:?}");
    println!("dE/dQ = {}", de_dq.transpose());

    system.set_joint_u(&mut state, body, 0, 10.0)?;
    system.realize(&mut state, Stage::Configured)?;
    system.clear_applied_forces(&mut state)?;
    system.apply_gravity(&mut state, &gravity)?;
    system.apply_joint_force(&mut state, body, 0, 147.0)?;

    system.realize(&mut state, Stage::Moving)?;
    let body_vel = system.body_velocity(&state, body)?;
    println!("body vel: {body_vel:?}");
    let w = body_vel.angular();
    println!("w x w x r = {}", w.cross(&w.cross(&Vec3::new(2.5, 0.0, 0.0))).transpose());
    println!("after applying gravity, body forces = {:?}", system.applied_body_forces(&state)?);
    println!("   joint forces = {}", system.applied_joint_forces(&state)?.transpose());

    system.realize(&mut state, Stage::Dynamics)?;
    let applied = system.applied_body_forces(&state)?.to_vec();
    let equivalent = system.calc_tree_equivalent_joint_forces(&state, &applied)?;
    println!("body forces -> equiv joint forces = {}", equivalent.transpose());

    system.realize(&mut state, Stage::Reacting)?;
    println!("body acc: {:?}", system.body_acceleration(&state, body)?);

    system.set_joint_u(&mut state, body, 0, 0.0)?;

    let integrator = config.integrator();
    integrator.run(&system, &mut state, config.end_time, config.report_interval, |_, system, s| {
        println!("{:.4} q = {} u = {}", s.time(), system.q(s)?.transpose(), system.u(s)?.transpose());
        println!("body config = {}", system.body_configuration(s, body)?);
        println!("body velocity = {:?}", system.body_velocity(s, body)?);

        let udot = system.u_dot(s)?;
        let udot2 = system.calc_tree_udot(s, system.applied_joint_forces(s)?, system.applied_body_forces(s)?)?;
        println!("udot  = {}", udot.transpose());
        println!("udot2 = {}", udot2.transpose());
        Ok(())
    })?;
    Ok(())
}
