use pilectric_units::*;

fn main() {
    let geometry_result = StepperGeometry::new(200, 16, 3.0);
    let moves = [
        MoveCommand::AngleInTime { angle: 90.0, time: 2.0 },
        MoveCommand::AngleAtSpeed { angle: -45.0, speed: 15.0 },
        MoveCommand::SpeedForTime { speed: 10.0, time: 6.0 },
        MoveCommand::AngleAtSpeed { angle: 10.0, speed: -1.0 },
    ];

    match geometry_result {
        Ok(geometry) => {
            println!("Stepper geometry:");
            println!("  Full steps per turn: {}", geometry.full_steps_per_turn());
            println!("  Microsteps:          {}", geometry.microsteps());
            println!("  Gear ratio:          {}", geometry.gear_ratio());
            println!("  Steps per output turn: {}", geometry.steps_per_output_turn());
            println!();

            for command in moves {
                match command.plan(&geometry) {
                    Ok(plan) => println!(
                        "{:?}\n  -> {} steps {:?}, {:.6} s apart, {:.3} s total",
                        command,
                        plan.steps,
                        plan.rotation,
                        plan.step_period,
                        plan.duration()
                    ),
                    Err(e) => println!("{:?}\n  -> rejected: {}", command, e),
                }
            }
        }
        Err(e) => {
            println!("Error creating stepper geometry: {}", e);
        }
    }

    println!();
    for iso in [100.0, 400.0, 3200.0] {
        match iso_to_gain(iso) {
            Ok(gain) => println!("ISO {} is {:.2} dB of gain", iso, gain),
            Err(e) => println!("ISO {}: {}", iso, e),
        }
    }
    let (numerator, denominator) = approximate_fraction(1.0 / 320.0, 1_000_000);
    println!("A 1/320 s shutter is sent as {}/{}", numerator, denominator);
}
