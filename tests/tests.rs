// Integration tests driving the emulator the way a firmware developer
// would: construct code bytes directly, step/run, and assert on the
// state snapshot or injected side effects. No round-trip grids -- each
// test pins a concrete scenario.

use asm2464pd_emu::config::TimerLine;
use asm2464pd_emu::{Config, Emulator, EmulatorError, StopReason, UsbSpeed};

fn firmware_of(code: &[u8]) -> Vec<u8> {
    // Bank0-upper starts at file offset 0x8000; bank1-upper at 0xFF6B.
    // 0xFF6B + 0x8000 is the minimum size a valid image must cover.
    let mut image = vec![0xFFu8; 0xFF6B + 0x8000];
    image[..code.len()].copy_from_slice(code);
    image
}

fn new_emulator(code: &[u8]) -> Emulator {
    let mut emu = Emulator::new(Config::default());
    emu.load_firmware(&firmware_of(code)).unwrap();
    emu
}

fn step_n(emu: &mut Emulator, n: usize) {
    for _ in 0..n {
        emu.step().unwrap();
    }
}

// S1. ADD + parity.
#[test]
fn seed_add_and_parity() {
    let mut emu = new_emulator(&[0x74, 0x55, 0x24, 0x2A]); // MOV A,#0x55; ADD A,#0x2A
    step_n(&mut emu, 2);
    let state = emu.dump_state();
    assert_eq!(state.a, 0x7F);
    assert_eq!(state.psw & 0x80, 0, "CY must be clear");
    assert_eq!(state.psw & 0x40, 0, "AC must be clear");
    assert_eq!(state.psw & 0x04, 0, "OV must be clear");
    assert_eq!(state.psw & 0x01, 0x01, "P must be set (0x7F has 7 bits set)");
    assert_eq!(state.cycles, 2);
}

// S2. Bit test, exercised through real bit-addressing instructions rather
// than by hand-computing masks: MOV C,bit reads through Memory::read_bit,
// CLR bit through Memory::write_bit, both against IDATA byte 0x20.
#[test]
fn seed_bit_addressing() {
    let program = [
        0x75, 0x20, 0xA5, // MOV 0x20,#0xA5  (1010_0101)
        0xA2, 0x00, // MOV C,0x00 -> bit 0 of 0xA5 = 1
        0xA2, 0x01, // MOV C,0x01 -> bit 1 = 0
        0xA2, 0x02, // MOV C,0x02 -> bit 2 = 1
        0xA2, 0x05, // MOV C,0x05 -> bit 5 = 1
        0xA2, 0x06, // MOV C,0x06 -> bit 6 = 0
        0xA2, 0x07, // MOV C,0x07 -> bit 7 = 1
        0xC2, 0x00, // CLR 0x00 (bit) -> clears bit 0 of IDATA 0x20
        0xE5, 0x20, // MOV A,0x20 -> surfaces the byte for inspection
    ];
    let mut emu = new_emulator(&program);
    step_n(&mut emu, 1);
    step_n(&mut emu, 1);
    assert_eq!(emu.dump_state().psw & 0x80, 0x80, "bit 0 of 0xA5 is 1");
    step_n(&mut emu, 1);
    assert_eq!(emu.dump_state().psw & 0x80, 0, "bit 1 of 0xA5 is 0");
    step_n(&mut emu, 1);
    assert_eq!(emu.dump_state().psw & 0x80, 0x80, "bit 2 of 0xA5 is 1");
    step_n(&mut emu, 1);
    assert_eq!(emu.dump_state().psw & 0x80, 0x80, "bit 5 of 0xA5 is 1");
    step_n(&mut emu, 1);
    assert_eq!(emu.dump_state().psw & 0x80, 0, "bit 6 of 0xA5 is 0");
    step_n(&mut emu, 1);
    assert_eq!(emu.dump_state().psw & 0x80, 0x80, "bit 7 of 0xA5 is 1");
    step_n(&mut emu, 2); // CLR 0x00, then MOV A,0x20
    assert_eq!(emu.dump_state().a, 0xA4, "clearing bit 0 leaves the rest of the byte intact");
}

// S3. Banked code: two banks of upper CODE, selected by SFR[0x96] bit 0.
// Lower CODE (<0x8000) is bank-shared regardless of the bit.
#[test]
fn seed_banked_code_read() {
    let mut code = vec![0xFFu8; 0xFF6B + 0x8000];
    code[0x9000] = 0xAA;
    code[0xFF6B + (0x9000 - 0x8000)] = 0xBB;
    code[0x1000] = 0x42;

    // MOV 0x96,#bank ; MOV DPTR,#0x9000 ; CLR A ; MOVC A,@A+DPTR
    let bank0 = [0x75, 0x96, 0x00, 0x90, 0x90, 0x00, 0xE4, 0x93];
    let bank1 = [0x75, 0x96, 0x01, 0x90, 0x90, 0x00, 0xE4, 0x93];

    let mut image0 = code.clone();
    image0[..bank0.len()].copy_from_slice(&bank0);
    let mut emu0 = Emulator::new(Config::default());
    emu0.load_firmware(&image0).unwrap();
    step_n(&mut emu0, 4);
    assert_eq!(emu0.dump_state().a, 0xAA, "bank 0 reads the shared-offset byte");

    let mut image1 = code.clone();
    image1[..bank1.len()].copy_from_slice(&bank1);
    let mut emu1 = Emulator::new(Config::default());
    emu1.load_firmware(&image1).unwrap();
    step_n(&mut emu1, 4);
    assert_eq!(emu1.dump_state().a, 0xBB, "bank 1 reads the BANK1_FILE_BASE-relative byte");

    // Lower CODE is independent of the bank bit either way.
    let lower_bank0 = [0x75, 0x96, 0x00, 0x90, 0x10, 0x00, 0xE4, 0x93];
    let lower_bank1 = [0x75, 0x96, 0x01, 0x90, 0x10, 0x00, 0xE4, 0x93];

    let mut image2 = code.clone();
    image2[..lower_bank0.len()].copy_from_slice(&lower_bank0);
    let mut emu2 = Emulator::new(Config::default());
    emu2.load_firmware(&image2).unwrap();
    step_n(&mut emu2, 4);
    assert_eq!(emu2.dump_state().a, 0x42);

    let mut image3 = code;
    image3[..lower_bank1.len()].copy_from_slice(&lower_bank1);
    let mut emu3 = Emulator::new(Config::default());
    emu3.load_firmware(&image3).unwrap();
    step_n(&mut emu3, 4);
    assert_eq!(emu3.dump_state().a, 0x42, "bank bit does not affect addresses below 0x8000");
}

// S4. Sync-flag auto-clear on plain XDATA RAM (0x1238, threshold 5): four
// reads observe the written value, the fifth read observes zero.
#[test]
fn seed_sync_flag_autoclear() {
    let program = [
        0x90, 0x12, 0x38, // MOV DPTR,#0x1238
        0x74, 0x01, // MOV A,#1
        0xF0, // MOVX @DPTR,A (write 0x01)
        0xE0, // read 1
        0xE0, // read 2
        0xE0, // read 3
        0xE0, // read 4
        0xE0, // read 5
    ];
    let mut emu = new_emulator(&program);
    step_n(&mut emu, 3); // MOV DPTR, MOV A, MOVX write
    step_n(&mut emu, 1);
    assert_eq!(emu.dump_state().a, 0x01, "read 1 observes the written value");
    step_n(&mut emu, 1);
    assert_eq!(emu.dump_state().a, 0x01, "read 2 observes the written value");
    step_n(&mut emu, 1);
    assert_eq!(emu.dump_state().a, 0x01, "read 3 observes the written value");
    step_n(&mut emu, 1);
    assert_eq!(emu.dump_state().a, 0x01, "read 4 observes the written value");
    step_n(&mut emu, 1);
    assert_eq!(emu.dump_state().a, 0x00, "read 5 observes the auto-cleared value");
}

// S5. Auto-ready timer CSR at 0xCC11 (MMIO, threshold 3): reads settle at
// the enable bit OR'd with the sticky expired bit, and an acknowledging
// write resets both.
#[test]
fn seed_timer_csr_autoready() {
    let program = [
        0x90, 0xCC, 0x11, // MOV DPTR,#0xCC11
        0x74, 0x01, // MOV A,#1
        0xF0, // MOVX @DPTR,A (enable)
        0xE0, // read 1
        0xE0, // read 2
        0xE0, // read 3 -- sticky ready bit (0x02) OR'd in here
        0xE0, // read 4 -- stays set
        0x74, 0x04, // MOV A,#4
        0xF0, // MOVX @DPTR,A (acknowledge/clear)
        0xE0, // read after clear
    ];
    let mut emu = new_emulator(&program);
    step_n(&mut emu, 3); // MOV DPTR, MOV A, MOVX write
    step_n(&mut emu, 1);
    assert_eq!(emu.dump_state().a, 0x01, "read 1 observes enable only");
    step_n(&mut emu, 1);
    assert_eq!(emu.dump_state().a, 0x01, "read 2 observes enable only");
    step_n(&mut emu, 1);
    assert_eq!(emu.dump_state().a, 0x03, "read 3 observes enable | expired");
    step_n(&mut emu, 1);
    assert_eq!(emu.dump_state().a, 0x03, "read 4 still observes enable | expired");
    step_n(&mut emu, 3); // MOV A,#4 ; MOVX write ; MOVX read
    assert_eq!(emu.dump_state().a, 0x00, "acknowledging write resets both bits");
}

// S6. Interrupt delivery: dispatch happens at an instruction boundary,
// pushes the resume address, and jumps to the fixed ext0 vector.
#[test]
fn seed_interrupt_delivery() {
    let mut image = vec![0xFFu8; 0xFF6B + 0x8000];
    // 0x0000: LJMP 0x0030 -- real firmware always jumps clear of the
    // vector table immediately, since the vectors are only 8 bytes apart.
    image[0x0000..0x0003].copy_from_slice(&[0x02, 0x00, 0x30]);
    // 0x0003: ext0 ISR -- pop the pushed return address into A (high) and
    // B (low) so the test can inspect it, then RETI.
    image[0x0003..0x0008].copy_from_slice(&[0xD0, 0xE0, 0xD0, 0xF0, 0x32]);
    // 0x0030: MOV IE,#0x81 (EA+EX0) ; SJMP $
    image[0x0030..0x0035].copy_from_slice(&[0x75, 0xA8, 0x81, 0x80, 0xFE]);

    let mut emu = Emulator::new(Config::default());
    emu.load_firmware(&image).unwrap();

    step_n(&mut emu, 1); // LJMP -> pc = 0x0030
    assert_eq!(emu.dump_state().pc, 0x0030);
    step_n(&mut emu, 1); // MOV IE,#0x81 -> pc = 0x0033
    assert_eq!(emu.dump_state().pc, 0x0033);

    emu.inject_control_transfer(0x21, 0x01, 0, 0, 0, None).unwrap(); // raises ext0

    step_n(&mut emu, 1); // SJMP $ executes, then service_interrupts dispatches
    let state = emu.dump_state();
    assert_eq!(state.pc, 0x0003, "dispatch jumps to the ext0 vector");

    step_n(&mut emu, 2); // POP ACC ; POP B -- reconstruct the pushed return PC
    let popped = emu.dump_state();
    assert_eq!(popped.a, 0x00, "high byte of the return address (0x0033)");
    assert_eq!(popped.b, 0x33, "low byte of the return address (0x0033)");
}

// Property 2: every write to A updates PSW.P to the odd parity of A.
#[test]
fn property_parity_tracks_accumulator() {
    let mut emu = new_emulator(&[0x74, 0x03]); // MOV A,#0x03 (even parity)
    step_n(&mut emu, 1);
    assert_eq!(emu.dump_state().psw & 0x01, 0, "0x03 has even parity");

    let mut emu2 = new_emulator(&[0x74, 0x07]); // MOV A,#0x07 (odd parity)
    step_n(&mut emu2, 1);
    assert_eq!(emu2.dump_state().psw & 0x01, 0x01, "0x07 has odd parity");
}

// Property 3: PUSH d ; POP d' with SP unchanged in between returns d.
#[test]
fn property_push_pop_round_trip() {
    let program = [
        0x75, 0x30, 0x99, // MOV 0x30,#0x99
        0xC0, 0x30, // PUSH 0x30
        0x75, 0x30, 0x00, // MOV 0x30,#0x00 (clobber before popping back)
        0xD0, 0x30, // POP 0x30
        0xE5, 0x30, // MOV A,0x30 -- surface the restored value
    ];
    let mut emu = new_emulator(&program);
    step_n(&mut emu, 5);
    assert_eq!(emu.dump_state().a, 0x99, "POP restored the value PUSH saved");
}

// Property 4: LCALL immediately followed by its natural RET returns to
// the instruction after the call.
#[test]
fn property_call_then_ret_returns_to_call_site() {
    let program = [
        0x12, 0x00, 0x08, // 0x0000 LCALL 0x0008
        0x00, 0x00, 0x00, 0x00, 0x00, // padding up to 0x0008
        0x22, // 0x0008 RET
    ];
    let mut emu = new_emulator(&program);
    step_n(&mut emu, 1); // LCALL
    assert_eq!(emu.dump_state().pc, 0x0008);
    step_n(&mut emu, 1); // RET
    assert_eq!(emu.dump_state().pc, 0x0003, "RET lands on the byte after the 3-byte LCALL");
}

// Property 5: reset() restores the documented bit-exact defaults.
#[test]
fn property_reset_restores_defaults() {
    let mut emu = new_emulator(&[0x74, 0xFF, 0x04, 0x04]); // MOV A,#0xFF; INC A; INC A
    step_n(&mut emu, 3);
    assert_ne!(emu.dump_state().pc, 0);

    emu.reset();
    let state = emu.dump_state();
    assert_eq!(state.pc, 0);
    assert_eq!(state.a, 0);
    assert_eq!(state.b, 0);
    assert_eq!(state.psw, 0);
    assert_eq!(state.sp, 0x07);
    assert_eq!(state.dptr, 0);
    assert_eq!(state.cycles, 0);
    assert_eq!(state.instructions_retired, 0);
}

// Property 9: RETI clears the in-ISR mark, so a later equal-priority
// interrupt can dispatch again (the mark stays set while in-ISR, which
// would otherwise block it).
#[test]
fn property_reti_reenables_same_level_dispatch() {
    let mut image = vec![0xFFu8; 0xFF6B + 0x8000];
    image[0x0000..0x0003].copy_from_slice(&[0x02, 0x00, 0x30]); // LJMP 0x0030
    image[0x0003..0x0006].copy_from_slice(&[0x05, 0x40, 0x32]); // INC 0x40 ; RETI
    image[0x0030..0x0035].copy_from_slice(&[0x75, 0xA8, 0x81, 0x80, 0xFE]); // MOV IE,#0x81 ; SJMP $

    let mut emu = Emulator::new(Config::default());
    emu.load_firmware(&image).unwrap();
    step_n(&mut emu, 2); // LJMP, MOV IE,#0x81 -> pc = 0x0033

    emu.inject_control_transfer(0x21, 0x01, 0, 0, 0, None).unwrap();
    step_n(&mut emu, 1); // SJMP $, dispatch fires
    assert_eq!(emu.dump_state().pc, 0x0003, "first dispatch reached the vector");
    step_n(&mut emu, 1); // INC 0x40
    step_n(&mut emu, 1); // RETI -> back to 0x0033, in-ISR mark cleared

    emu.inject_control_transfer(0x21, 0x01, 0, 0, 0, None).unwrap();
    step_n(&mut emu, 1); // SJMP $ again, dispatch must succeed again post-RETI
    assert_eq!(emu.dump_state().pc, 0x0003, "second dispatch reached the vector again");
}

#[test]
fn run_reports_max_cycles_stop() {
    let mut emu = new_emulator(&[0x80, 0xFE]); // SJMP $ -- infinite self-loop
    let reason = emu.run(Some(10), None).unwrap();
    assert_eq!(reason, StopReason::MaxCycles);
}

#[test]
fn run_reports_breakpoint_hit() {
    let program = [0x00, 0x00, 0x00, 0x00, 0x80, 0xFE]; // four NOPs then spin
    let mut emu = new_emulator(&program);
    emu.add_breakpoint(0x0002);
    let reason = emu.run(Some(1_000), None).unwrap();
    assert_eq!(reason, StopReason::BreakpointHit(0x0002));
}

#[test]
fn illegal_opcode_faults_with_pc() {
    let mut emu = new_emulator(&[0xA5]); // the one genuinely undefined MCS-51 opcode
    let reason = emu.run(Some(1_000), None).unwrap();
    match reason {
        StopReason::Fault { pc, .. } => assert_eq!(pc, 0x0000),
        other => panic!("expected a fault, got {:?}", other),
    }
}

#[test]
fn injected_scsi_write_stages_cdb_and_data() {
    let mut emu = new_emulator(&[0x00]);
    emu.inject_scsi_write(0x1234, 4, &[0xDE, 0xAD, 0xBE, 0xEF]).unwrap();
    assert_eq!(emu.inject_vendor_command(0xE4, 0x910D, 0).unwrap(), Some(0x8A)); // WRITE(16) opcode
    assert_eq!(emu.inject_vendor_command(0xE4, 0x8000, 0).unwrap(), Some(0xDE));
}

// The setup-packet window (0x9104..0x910B) and the CDB window (0x910D..)
// sit back-to-back in the hooked USB range; staging one must not clobber
// the other's already-written bytes.
#[test]
fn control_transfer_and_scsi_write_do_not_clobber_each_other() {
    let mut emu = new_emulator(&[0x00]);
    emu.inject_control_transfer(0x21, 0x09, 0x0201, 0x0000, 0x0004, None).unwrap();
    emu.inject_scsi_write(0x1234, 4, &[0xDE, 0xAD, 0xBE, 0xEF]).unwrap();

    // Setup packet fields survive the later SCSI injection.
    assert_eq!(emu.inject_vendor_command(0xE4, 0x9104, 0).unwrap(), Some(0x21), "bmReq");
    assert_eq!(emu.inject_vendor_command(0xE4, 0x9105, 0).unwrap(), Some(0x09), "bReq");
    assert_eq!(emu.inject_vendor_command(0xE4, 0x9106, 0).unwrap(), Some(0x01), "wValL");
    assert_eq!(emu.inject_vendor_command(0xE4, 0x9107, 0).unwrap(), Some(0x02), "wValH");

    // CDB survives too -- neither window overlaps the other.
    assert_eq!(emu.inject_vendor_command(0xE4, 0x910D, 0).unwrap(), Some(0x8A), "WRITE(16) opcode");
    assert_eq!(emu.inject_vendor_command(0xE4, 0x8000, 0).unwrap(), Some(0xDE));
}

#[test]
fn uart_writes_reach_the_output_sink() {
    let program = [0x90, 0xC0, 0x00, 0x74, b'h', 0xF0]; // MOV DPTR,#0xC000 ; MOV A,#'h' ; MOVX @DPTR,A
    let mut emu = new_emulator(&program);
    step_n(&mut emu, 3);
    assert_eq!(emu.uart_output(), &[b'h']);
}

#[test]
fn sfr_ie_roundtrips_through_direct_addressing() {
    let program = [0x75, 0xA8, 0x42, 0xE5, 0xA8]; // MOV IE,#0x42 ; MOV A,IE
    let mut emu = new_emulator(&program);
    step_n(&mut emu, 2);
    assert_eq!(emu.dump_state().a, 0x42);
}

#[test]
fn connect_usb_raises_ext0_after_configured_delay() {
    let mut config = Config::default();
    config.usb_connect_delay_cycles = 4; // keep the test fast
    let mut emu = Emulator::new(config);
    emu.load_firmware(&firmware_of(&[0x00; 16])).unwrap(); // NOPs to burn cycles
    emu.connect_usb(UsbSpeed::Super).unwrap();
    step_n(&mut emu, 8); // more than enough NOPs to cross the 4-cycle delay
    assert_eq!(emu.inject_vendor_command(0xE4, 0x9000, 0).unwrap(), Some(0x81));
}

// The periodic timer pulse must raise the *configured* pending-interrupt
// line, not always ext0 -- a build where `TimerLine::Ext1` was wired to
// `raise_ext0` would dispatch to the wrong vector here (0x0003 instead
// of 0x0013).
#[test]
fn timer_tick_configured_for_ext1_dispatches_to_ext1_vector() {
    let mut config = Config::default();
    config.timer_interrupt_line = TimerLine::Ext1;
    config.timer_interval_cycles = 10;
    let mut emu = Emulator::new(config);
    let mut image = vec![0xFFu8; 0xFF6B + 0x8000];
    image[0x0000..0x0003].copy_from_slice(&[0x02, 0x00, 0x30]); // LJMP 0x0030
    image[0x0030..0x0035].copy_from_slice(&[0x75, 0xA8, 0x84, 0x80, 0xFE]); // MOV IE,#0x84 (EA+EX1) ; SJMP $
    emu.load_firmware(&image).unwrap();

    step_n(&mut emu, 2); // LJMP, MOV IE,#0x84 -> pc = 0x0033
    // Spin on SJMP $ until the 10-cycle timer interval elapses and ext1 fires.
    for _ in 0..10 {
        step_n(&mut emu, 1);
        if emu.dump_state().pc == 0x0013 {
            break;
        }
    }
    assert_eq!(emu.dump_state().pc, 0x0013, "timer pulse must dispatch to the ext1 vector, not ext0's 0x0003");
}

// §4.2 failure semantics: an MMIO address inside a hooked range but not
// modelled by any named register defaults to 0x00 for the first
// `default_poll_threshold - 1` reads, then settles permanently at 0xFF.
#[test]
fn unhandled_mmio_address_settles_at_0xff_after_poll_threshold() {
    let program = [
        0x90, 0xC4, 0x05, // MOV DPTR,#0xC405 (inside 0xC400-0xC700, not a named register)
        0xE0, // read 1
        0xE0, // read 2
        0xE0, // read 3 -- default_poll_threshold (3) reached
        0xE0, // read 4 -- stays 0xFF
    ];
    let mut emu = new_emulator(&program);
    step_n(&mut emu, 1); // MOV DPTR
    step_n(&mut emu, 1);
    assert_eq!(emu.dump_state().a, 0x00, "read 1 is below threshold");
    step_n(&mut emu, 1);
    assert_eq!(emu.dump_state().a, 0x00, "read 2 is below threshold");
    step_n(&mut emu, 1);
    assert_eq!(emu.dump_state().a, 0xFF, "read 3 reaches the poll threshold");
    step_n(&mut emu, 1);
    assert_eq!(emu.dump_state().a, 0xFF, "read 4 stays settled at 0xFF");
}

#[test]
fn peek_and_poke_sfr_validate_the_address_range() {
    let mut emu = new_emulator(&[0x00]);
    emu.poke_sfr(0xA8, 0x42).unwrap(); // IE
    assert_eq!(emu.peek_sfr(0xA8).unwrap(), 0x42);
    assert!(emu.peek_sfr(0x10).is_err(), "0x10 is below the SFR range");
    assert!(emu.poke_sfr(0x7F, 0x00).is_err(), "0x7F is IDATA, not SFR");
}

#[test]
fn injecting_before_load_firmware_returns_not_initialized() {
    let mut emu = Emulator::new(Config::default());
    assert!(matches!(emu.connect_usb(UsbSpeed::Full), Err(EmulatorError::NotInitialized)));
    assert!(matches!(
        emu.inject_control_transfer(0x21, 0x01, 0, 0, 0, None),
        Err(EmulatorError::NotInitialized)
    ));
    assert!(matches!(
        emu.inject_scsi_write(0, 0, &[]),
        Err(EmulatorError::NotInitialized)
    ));
    assert!(matches!(
        emu.inject_vendor_command(0xE4, 0, 0),
        Err(EmulatorError::NotInitialized)
    ));
}
