//! One SID voice: oscillator, envelope and the revision's DC offset

use super::envelope::EnvelopeGenerator;
use super::registers::VoiceRegister;
use super::waveform::WaveformGenerator;
use super::ChipModel;

/// Oscillator and envelope of one voice
#[derive(Debug, Clone)]
pub struct Voice {
    /// Oscillator
    pub wave: WaveformGenerator,
    /// ADSR envelope
    pub envelope: EnvelopeGenerator,
    offset: f32,
}

impl Voice {
    /// Create a voice for the given revision
    pub fn new(model: ChipModel) -> Self {
        Voice {
            wave: WaveformGenerator::new(model),
            envelope: EnvelopeGenerator::new(model.wave_nonlinearity()),
            offset: model.voice_offset(),
        }
    }

    /// Switch DAC tables and offset to another revision
    pub fn set_chip_model(&mut self, model: ChipModel) {
        self.wave.set_chip_model(model);
        self.envelope.set_nonlinearity(model.wave_nonlinearity());
        self.offset = model.voice_offset();
    }

    /// Amplitude-modulated waveform output
    ///
    /// `ring_modulator` is the voice feeding this one's ring modulation.
    #[inline]
    pub fn output(&self, ring_modulator: &WaveformGenerator) -> f32 {
        self.wave.output(ring_modulator) * self.envelope.output() + self.offset
    }

    /// Dispatch a per-voice register write
    pub fn write(&mut self, reg: VoiceRegister, value: u8, ring_modulator: &WaveformGenerator) {
        match reg {
            VoiceRegister::FreqLo => self.wave.write_freq_lo(value),
            VoiceRegister::FreqHi => self.wave.write_freq_hi(value),
            VoiceRegister::PwLo => self.wave.write_pw_lo(value),
            VoiceRegister::PwHi => self.wave.write_pw_hi(value),
            VoiceRegister::Control => {
                self.wave.write_control(ring_modulator, value);
                self.envelope.write_control(value);
            }
            VoiceRegister::AttackDecay => self.envelope.write_attack_decay(value),
            VoiceRegister::SustainRelease => self.envelope.write_sustain_release(value),
        }
    }

    /// Silence the voice without stopping its generators
    pub fn mute(&mut self, enable: bool) {
        self.envelope.mute(enable);
    }

    /// Reset oscillator and envelope
    pub fn reset(&mut self) {
        self.wave.reset();
        self.envelope.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_silent_voice_outputs_offset() {
        for model in [ChipModel::Mos6581, ChipModel::Mos8580] {
            let voice = Voice::new(model);
            let ring = WaveformGenerator::new(model);
            assert_relative_eq!(voice.output(&ring), model.voice_offset());
        }
    }

    #[test]
    fn test_gated_voice_moves_away_from_offset() {
        let model = ChipModel::Mos8580;
        let mut voice = Voice::new(model);
        let ring = WaveformGenerator::new(model);
        voice.write(VoiceRegister::FreqHi, 0x10, &ring);
        voice.write(VoiceRegister::AttackDecay, 0x00, &ring);
        voice.write(VoiceRegister::SustainRelease, 0xF0, &ring);
        voice.write(VoiceRegister::Control, 0x21, &ring);
        for _ in 0..5000 {
            voice.wave.clock();
            voice.envelope.clock();
        }
        assert!((voice.output(&ring) - model.voice_offset()).abs() > 1000.0);
        voice.mute(true);
        assert_relative_eq!(voice.output(&ring), model.voice_offset());
    }
}
